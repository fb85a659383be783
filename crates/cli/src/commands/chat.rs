//! `saferplaces chat` — Interactive conversation about a project.

use std::io::Write;
use std::sync::Arc;

use saferplaces_agent::{AgentRuntime, NewLayer, Session, TurnEvent};
use saferplaces_config::AppConfig;
use saferplaces_core::message::{Role, ThreadId};
use saferplaces_core::state::LayerDescriptor;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    user: String,
    project: String,
    thread: Option<String>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = saferplaces_providers::router::build_from_config(&config)
        .default_provider()
        .ok_or("No default provider configured — set OPENAI_API_KEY or run `saferplaces onboard`")?;
    let runtime = Arc::new(AgentRuntime::from_config(&config, provider)?);

    let thread_id = thread.as_deref().map(ThreadId::from).unwrap_or_default();
    let session = Session::start(runtime, thread_id, user, project).await?;
    tracing::debug!(thread = %session.thread_id(), bucket = %session.bucket(), "session opened");

    // Single message mode
    if let Some(msg) = message {
        run_turn(&session, &msg).await;
        return Ok(());
    }

    println!("SaferPlaces — {} / {}", session.user_id(), session.project_id());
    println!("   Thread: {}", session.thread_id());
    println!("   Bucket: {}", session.bucket());
    println!("   Type /help for commands, /exit to quit.\n");

    if let Some(pending) = session.pending().await {
        println!("❓ {}\n", pending.interrupt.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.split_once(' ').unwrap_or((input, "")) {
            ("/exit" | "/quit", _) => break,
            ("/help", _) => print_help(),
            ("/layers", _) => print_layers(&session.layers().await),
            ("/thread", _) => println!("{}\n", session.thread_id()),
            ("/add-layer", src) => {
                let src = src.trim();
                if src.is_empty() {
                    println!("usage: /add-layer <uri>\n");
                    continue;
                }
                match session.register_layer(NewLayer::new(src)).await {
                    Ok(layers) => print_layers(&layers),
                    Err(e) => println!("❌ {e}\n"),
                }
            }
            _ => run_turn(&session, input).await,
        }
    }

    println!("Thread saved as {}. Resume with --thread.", session.thread_id());
    Ok(())
}

async fn run_turn(session: &Session, input: &str) {
    let mut turn = session.prompt(input).await;
    while let Some(event) = turn.next_event().await {
        if let Some(out) = render(&event) {
            println!("{out}\n");
        }
    }
}

fn render(event: &TurnEvent) -> Option<String> {
    match event {
        TurnEvent::Message { message } if message.role == Role::Assistant => {
            if message.content.trim().is_empty() {
                let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
                (!names.is_empty()).then(|| format!("🔧 calling {}", names.join(", ")))
            } else {
                Some(format!("agent> {}", message.content))
            }
        }
        TurnEvent::Message { .. } => None,
        TurnEvent::ToolResult { message } => Some(format!(
            "🔧 {} finished",
            message.name.as_deref().unwrap_or("tool")
        )),
        TurnEvent::Interrupt { interrupt } => Some(format!("❓ {}", interrupt.content)),
        TurnEvent::LayersUpdated { layers } => Some(format!("🗺  {} layer(s) in the project", layers.len())),
        TurnEvent::Error { message } => Some(format!("❌ {message}")),
    }
}

fn print_layers(layers: &[LayerDescriptor]) {
    if layers.is_empty() {
        println!("No layers yet.\n");
        return;
    }
    for layer in layers {
        let kind = serde_json::to_value(layer.layer_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!("  • {} [{kind}] {}", layer.title, layer.src);
    }
    println!();
}

fn print_help() {
    println!("  /layers            list the project's layers");
    println!("  /add-layer <uri>   register an existing file as a layer");
    println!("  /thread            print the thread id");
    println!("  /exit              quit\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use saferplaces_core::message::Message;
    use saferplaces_core::tool::{Interrupt, InterruptType};

    #[test]
    fn assistant_text_is_rendered() {
        let event = TurnEvent::Message {
            message: Message::assistant("Flood map ready."),
        };
        assert_eq!(render(&event).unwrap(), "agent> Flood map ready.");
    }

    #[test]
    fn system_messages_are_hidden() {
        let event = TurnEvent::Message {
            message: Message::system("[CONTEXT]"),
        };
        assert!(render(&event).is_none());
    }

    #[test]
    fn interrupts_show_the_question() {
        let event = TurnEvent::Interrupt {
            interrupt: Interrupt {
                content: "Run the simulation?".into(),
                interrupt_type: InterruptType::ExecutionConfirmation,
                tool_name: "safer_rain".into(),
                args: Default::default(),
                pending_output: None,
                resumable: true,
                namespace: vec![],
            },
        };
        assert_eq!(render(&event).unwrap(), "❓ Run the simulation?");
    }
}

use std::env;
use std::error::Error;
use std::io::Write;

use adk_playground::conversation::PROGRESS_MARKER;
use adk_playground::{
    DEFAULT_GOOGLE_MODEL, EntryId, EntryKind, GoogleModel, Playground, PlaygroundSnapshot,
    ResponseShape, Submission, SubmitOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let shape = if env::args().skip(1).any(|arg| arg == "--streaming") {
        ResponseShape::Streaming
    } else {
        ResponseShape::ToolAugmented
    };

    let model_name =
        env::var("PLAYGROUND_MODEL").unwrap_or_else(|_| DEFAULT_GOOGLE_MODEL.to_string());
    let model = GoogleModel::from_env(model_name)?;

    let playground = Playground::builder().model(model).shape(shape).build()?;
    tracing::info!(?shape, "playground ready");

    println!("Live Playground ({shape:?}). Type a message, /s to list suggestions, /s <key> to pick one, /system <text>, /quit.");
    print_suggestions(&playground.snapshot());

    let mut updates = playground.subscribe();
    let mut printer = Printer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let line = line.trim();

        let submission = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/s", "") => {
                print_suggestions(&playground.snapshot());
                continue;
            }
            ("/s", key) => Submission::Suggestion(key.trim().to_string()),
            ("/system", instruction) => {
                playground.set_system_instruction(instruction.trim());
                println!("system instruction updated");
                continue;
            }
            _ => {
                playground.set_input(line);
                Submission::Typed
            }
        };

        let submit = playground.submit(submission);
        tokio::pin!(submit);

        let outcome = loop {
            tokio::select! {
                outcome = &mut submit => break outcome,
                changed = updates.changed() => {
                    if changed.is_ok() {
                        printer.render(&updates.borrow_and_update());
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    playground.cancel();
                }
            }
        };
        printer.render(&playground.snapshot());

        match outcome {
            SubmitOutcome::Ignored(reason) => println!("(ignored: {reason:?})"),
            SubmitOutcome::Cancelled => println!("(stopped)"),
            SubmitOutcome::Completed | SubmitOutcome::Failed => {}
        }
        print_suggestions(&playground.snapshot());
    }

    Ok(())
}

fn print_suggestions(snapshot: &PlaygroundSnapshot) {
    println!("suggestions:");
    for suggestion in &snapshot.suggestions {
        println!("  /s {:<28} {}", suggestion.key, suggestion.label);
    }
}

/// Prints log entries once, streaming the in-flight one incrementally.
#[derive(Default)]
struct Printer {
    printed: usize,
    partial: Option<(EntryId, EntryKind, usize)>,
}

impl Printer {
    fn render(&mut self, snapshot: &PlaygroundSnapshot) {
        for entry in snapshot.entries.iter().skip(self.printed) {
            let text = if entry.in_flight {
                entry
                    .text
                    .strip_suffix(PROGRESS_MARKER)
                    .unwrap_or(&entry.text)
            } else {
                entry.text.as_str()
            };

            let resumed = match self.partial {
                Some((id, kind, offset)) if id == entry.id && kind == entry.kind => Some(offset),
                Some(_) => {
                    println!();
                    None
                }
                None => None,
            };

            let offset = match resumed {
                Some(offset) => offset,
                None => {
                    print!("{}", label(entry.kind));
                    0
                }
            };
            print!("{}", text.get(offset..).unwrap_or_default());

            if entry.in_flight {
                self.partial = Some((entry.id, entry.kind, text.len()));
                let _ = std::io::stdout().flush();
                return;
            }

            println!();
            self.partial = None;
            self.printed += 1;
        }
    }
}

fn label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::User => "you: ",
        EntryKind::Agent => "agent: ",
        EntryKind::Thought => "thinking: ",
        EntryKind::ToolCall => "calling code_interpreter:\n",
        EntryKind::ToolResult => "tool result:\n",
        EntryKind::Error => "error: ",
    }
}

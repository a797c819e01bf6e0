use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use console::{Term, style};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::info;

use crate::core::api_client::HttpAssistantApi;
use crate::core::classifier::{AspectRatio, ImageAttachment};
use crate::core::config::AppConfig;
use crate::core::conversation::{AssistantApi, Conversation};
use crate::core::session::{FileStorage, KeyValueStore, Language, Sender, Session, SessionStore};
use crate::core::terminal::{
    self, GuideSection, PICTURE, print_error, print_info, print_success, print_warn,
};
use crate::core::transcript::{self, Transcript, TranscriptEntry};

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChatInput {
    Message(String),
    AttachImage { path: PathBuf, text: String },
    Ratio(Option<AspectRatio>),
    Language(Language),
    NewConversation,
    History,
    Load(String),
    Delete(String),
    ClearHistory,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub(crate) fn parse_input(line: &str) -> ChatInput {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }
    if !line.starts_with('/') {
        return ChatInput::Message(line.to_string());
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "/image" | "/img" => {
            if rest.is_empty() {
                return ChatInput::Invalid("usage: /image <path> [text]".into());
            }
            let (path, text) = match rest.split_once(char::is_whitespace) {
                Some((path, text)) => (path, text.trim()),
                None => (rest, ""),
            };
            ChatInput::AttachImage {
                path: PathBuf::from(path),
                text: text.to_string(),
            }
        }
        "/ratio" => match rest {
            "" | "auto" | "off" => ChatInput::Ratio(None),
            label => match label.parse::<AspectRatio>() {
                Ok(ratio) => ChatInput::Ratio(Some(ratio)),
                Err(e) => ChatInput::Invalid(e),
            },
        },
        "/lang" => match rest.parse::<Language>() {
            Ok(language) => ChatInput::Language(language),
            Err(e) => ChatInput::Invalid(e),
        },
        "/new" => ChatInput::NewConversation,
        "/history" => ChatInput::History,
        "/load" if !rest.is_empty() => ChatInput::Load(rest.to_string()),
        "/delete" if !rest.is_empty() => ChatInput::Delete(rest.to_string()),
        "/load" | "/delete" => ChatInput::Invalid(format!("usage: {} <session id>", command)),
        "/clear-history" | "/clear" => ChatInput::ClearHistory,
        "/help" | "/?" => ChatInput::Help,
        "/quit" | "/exit" | "/q" => ChatInput::Quit,
        other => ChatInput::Invalid(format!("unknown command {}, try /help", other)),
    }
}

/// Reads an image file into a `data:` URL attachment.
pub(crate) async fn read_attachment(path: &Path) -> Result<ImageAttachment> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() != mime_guess::mime::IMAGE {
        bail!("{} is not an image ({})", path.display(), mime);
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(ImageAttachment {
        file_name,
        data_url: format!("data:{};base64,{}", mime, STANDARD.encode(bytes)),
    })
}

/// Shows the localized "thinking" line until dropped.
struct Thinking {
    term: Term,
}

impl Thinking {
    fn show(language: Language) -> Self {
        let term = Term::stdout();
        let _ = term.write_str(&format!("{}", style(language.thinking()).dim()));
        Self { term }
    }
}

impl Drop for Thinking {
    fn drop(&mut self) {
        let _ = self.term.clear_line();
    }
}

pub(super) fn print_entry(entry: &TranscriptEntry<'_>) {
    match entry {
        TranscriptEntry::Bubble {
            sender: Sender::User,
            text,
        } => println!("{} {}", style("you ›").cyan().bold(), text),
        TranscriptEntry::Bubble {
            sender: Sender::Ai,
            text,
        } => println!("{} {}", style("ai  ›").green().bold(), text),
        TranscriptEntry::Error { text } => println!("{} {}", style("ai  ›").red().bold(), style(text).red()),
        TranscriptEntry::Image { sender, src, alt } => {
            let who = match sender {
                Sender::User => style("you ›").cyan().bold(),
                Sender::Ai => style("ai  ›").green().bold(),
            };
            let shown = if src.starts_with("data:") { "(inline image)" } else { *src };
            if alt.is_empty() {
                println!("{} {}{}", who, PICTURE, style(shown).underlined());
            } else {
                println!("{} {}{} {}", who, PICTURE, style(shown).underlined(), style(alt).dim());
            }
        }
        TranscriptEntry::ImagePlaceholder { file_name } => println!(
            "{} {}{}",
            style("you ›").cyan().bold(),
            PICTURE,
            style(format!("{} (not kept in history)", file_name)).dim()
        ),
    }
}

pub(super) fn print_transcript(transcript: Transcript<'_>) {
    for entry in transcript {
        print_entry(&entry);
    }
}

pub(super) fn print_session_list(sessions: &[Session]) {
    if sessions.is_empty() {
        print_info("No saved conversations.");
        return;
    }
    for session in sessions {
        println!(
            "  {}  {}  {}",
            style(&session.id).cyan(),
            style(session.timestamp.format("%Y-%m-%d %H:%M")).dim(),
            session.title
        );
    }
}

fn print_chat_help() {
    GuideSection::new("Chat commands")
        .command("<text>", "Chat, or ask for a picture (\"画一只猫\")")
        .command("/image <path> [text]", "Attach an image: restyle, edit or ask about it")
        .command("/ratio [1:1|4:3|3:4|16:9|9:16|off]", "Aspect ratio for new images")
        .command("/lang <zh|en|ru>", "Interface language")
        .command("/new", "Save and start a new conversation")
        .command("/history", "List saved conversations")
        .command("/load <id>", "Open a saved conversation")
        .command("/delete <id>", "Delete a saved conversation")
        .command("/clear-history", "Delete all saved conversations")
        .command("/quit", "Save and leave")
        .print();
}

async fn send_turn<S: KeyValueStore, A: AssistantApi>(
    conversation: &mut Conversation<S, A>,
    text: &str,
    image: Option<ImageAttachment>,
) {
    let before = conversation.messages().len();
    let outcome = {
        let _thinking = Thinking::show(conversation.language());
        conversation.send(text, image).await
    };
    if let Some(outcome) = outcome {
        info!(
            "{} turn finished (succeeded: {})",
            outcome.operation, outcome.succeeded
        );
        // The user's own lines are already on screen.
        let new_messages = &conversation.messages()[before..];
        for entry in transcript::render(new_messages) {
            if !matches!(
                entry,
                TranscriptEntry::Bubble { sender: Sender::User, .. }
                    | TranscriptEntry::Image { sender: Sender::User, .. }
            ) {
                print_entry(&entry);
            }
        }
    }
}

/// Handles one parsed line. Returns false when the user asked to leave.
async fn handle_input<S: KeyValueStore, A: AssistantApi>(
    conversation: &mut Conversation<S, A>,
    input: ChatInput,
) -> bool {
    match input {
        ChatInput::Empty => {}
        ChatInput::Message(text) => send_turn(conversation, &text, None).await,
        ChatInput::AttachImage { path, text } => match read_attachment(&path).await {
            Ok(image) => send_turn(conversation, &text, Some(image)).await,
            Err(e) => print_error(&format!("{:#}", e)),
        },
        ChatInput::Ratio(ratio) => {
            conversation.set_aspect_ratio(ratio);
            match ratio {
                Some(ratio) => print_success(&format!("Aspect ratio {}", ratio.label())),
                None => print_success("Aspect ratio reset to the provider default"),
            }
        }
        ChatInput::Language(language) => match conversation.set_language(language) {
            Ok(()) => print_success(&format!("Language set to {}", language.code())),
            Err(e) => print_error(&e.to_string()),
        },
        ChatInput::NewConversation => {
            conversation.new_conversation();
            print_success("Started a new conversation");
            println!("{} {}", style("ai  ›").green().bold(), conversation.language().welcome());
        }
        ChatInput::History => {
            conversation.leave_view();
            match conversation.sessions() {
                Ok(sessions) => print_session_list(&sessions),
                Err(e) => print_error(&e.to_string()),
            }
        }
        ChatInput::Load(id) => match conversation.load_session(&id) {
            Ok(session) => {
                terminal::print_step(&session.title);
                print_transcript(transcript::restore(&session));
            }
            Err(e) => print_error(&e.to_string()),
        },
        ChatInput::Delete(id) => match conversation.delete_session(&id) {
            Ok(outcome) if outcome.was_active => {
                print_success(&format!("Deleted {}, starting fresh", id))
            }
            Ok(outcome) if outcome.removed => print_success(&format!("Deleted {}", id)),
            Ok(_) => print_error(&format!("session {} not found", id)),
            Err(e) => print_error(&e.to_string()),
        },
        ChatInput::ClearHistory => match conversation.clear_history() {
            Ok(()) => print_success("All saved conversations removed"),
            Err(e) => print_error(&e.to_string()),
        },
        ChatInput::Help => print_chat_help(),
        ChatInput::Quit => return false,
        ChatInput::Invalid(message) => print_error(&message),
    }
    true
}

pub(super) async fn run_chat(config: &AppConfig, api_url: String) -> Result<()> {
    let storage = FileStorage::new(config.storage_dir())?;
    let store = SessionStore::new(storage, config.history.max_sessions);
    let api = HttpAssistantApi::new(api_url)?;
    info!("Chat client talking to {}", api.base_url());
    terminal::print_link("Server", api.base_url());

    let mut conversation = Conversation::new(store, api);
    terminal::print_banner();
    print_info("Type /help for commands.");
    println!("{} {}", style("ai  ›").green().bold(), conversation.language().welcome());

    let lines = BufReader::new(tokio::io::stdin()).lines();
    drive(&mut conversation, lines, tokio::signal::ctrl_c()).await?;
    terminal::print_goodbye();
    Ok(())
}

/// Feeds input lines to the conversation until EOF, `/quit` or `interrupt`.
/// `interrupt` is armed once for the whole session, so it also cuts a turn in flight.
/// The draft is saved on every exit path.
async fn drive<S, A, R, I>(
    conversation: &mut Conversation<S, A>,
    mut lines: Lines<R>,
    interrupt: I,
) -> Result<()>
where
    S: KeyValueStore,
    A: AssistantApi,
    R: AsyncBufRead + Unpin,
    I: Future,
{
    tokio::pin!(interrupt);
    let result = loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut interrupt => {
                println!();
                break Ok(());
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };

        let keep_going = tokio::select! {
            keep_going = handle_input(conversation, parse_input(&line)) => keep_going,
            _ = &mut interrupt => {
                println!();
                print_warn("Interrupted; the unanswered message stays in history.");
                false
            }
        };
        if !keep_going {
            break Ok(());
        }
    };

    conversation.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::OperationPlan;
    use crate::core::conversation::{ApiFailure, AssistantReply};
    use crate::core::session::MemoryStorage;
    use async_trait::async_trait;
    use std::time::Duration;

    /// An assistant that never answers, like a long image job.
    struct StalledApi;

    #[async_trait]
    impl AssistantApi for StalledApi {
        async fn execute(&self, _plan: &OperationPlan) -> Result<AssistantReply, ApiFailure> {
            std::future::pending().await
        }
    }

    struct EchoApi;

    #[async_trait]
    impl AssistantApi for EchoApi {
        async fn execute(&self, _plan: &OperationPlan) -> Result<AssistantReply, ApiFailure> {
            Ok(AssistantReply::Text("pong".into()))
        }
    }

    fn conversation<A: AssistantApi>(storage: &MemoryStorage, api: A) -> Conversation<MemoryStorage, A> {
        Conversation::new(SessionStore::new(storage.clone(), 20), api)
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_turn_ends_session_and_saves() {
        let storage = MemoryStorage::new();
        let mut convo = conversation(&storage, StalledApi);
        let lines = BufReader::new(&b"hello\nsecond line\n"[..]).lines();

        drive(&mut convo, lines, tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();

        let saved = conversation(&storage, EchoApi).sessions().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].messages.len(), 1);
        assert_eq!(saved[0].messages[0].text, "hello");
        assert!(!convo.store().is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_while_waiting_for_input_ends_session() {
        let storage = MemoryStorage::new();
        let mut convo = conversation(&storage, EchoApi);
        // Writer kept alive so the reader never sees EOF.
        let (_writer, reader) = tokio::io::duplex(64);
        let lines = BufReader::new(reader).lines();

        drive(&mut convo, lines, tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(convo.messages().is_empty());
    }

    #[tokio::test]
    async fn quit_command_stops_after_answered_turn() {
        let storage = MemoryStorage::new();
        let mut convo = conversation(&storage, EchoApi);
        let lines = BufReader::new(&b"ping\n/quit\nnever sent\n"[..]).lines();

        drive(&mut convo, lines, std::future::pending::<()>()).await.unwrap();

        let texts: Vec<_> = convo.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["ping", "pong"]);
        assert_eq!(conversation(&storage, EchoApi).sessions().unwrap().len(), 1);
    }

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse_input("  画一只猫 "), ChatInput::Message("画一只猫".into()));
        assert_eq!(parse_input("   "), ChatInput::Empty);
    }

    #[test]
    fn image_command_splits_path_and_text() {
        assert_eq!(
            parse_input("/image ./cat.png 风格：水彩"),
            ChatInput::AttachImage {
                path: PathBuf::from("./cat.png"),
                text: "风格：水彩".into()
            }
        );
        assert_eq!(
            parse_input("/img cat.jpg"),
            ChatInput::AttachImage {
                path: PathBuf::from("cat.jpg"),
                text: String::new()
            }
        );
        assert!(matches!(parse_input("/image"), ChatInput::Invalid(_)));
    }

    #[test]
    fn ratio_command_accepts_labels_and_auto() {
        assert_eq!(parse_input("/ratio 16:9"), ChatInput::Ratio(Some(AspectRatio::Wide16x9)));
        assert_eq!(parse_input("/ratio auto"), ChatInput::Ratio(None));
        assert_eq!(parse_input("/ratio"), ChatInput::Ratio(None));
        assert!(matches!(parse_input("/ratio 2:1"), ChatInput::Invalid(_)));
    }

    #[test]
    fn history_commands_need_ids() {
        assert_eq!(parse_input("/load chat-1"), ChatInput::Load("chat-1".into()));
        assert_eq!(parse_input("/delete chat-2"), ChatInput::Delete("chat-2".into()));
        assert!(matches!(parse_input("/load"), ChatInput::Invalid(_)));
        assert_eq!(parse_input("/clear-history"), ChatInput::ClearHistory);
        assert_eq!(parse_input("/lang en"), ChatInput::Language(Language::En));
        assert_eq!(parse_input("/exit"), ChatInput::Quit);
        assert!(matches!(parse_input("/dance"), ChatInput::Invalid(_)));
    }

    #[tokio::test]
    async fn attachment_becomes_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let image = read_attachment(&path).await.unwrap();
        assert_eq!(image.file_name, "dot.png");
        assert_eq!(image.data_url, "data:image/png;base64,iVBORw==");
    }

    #[tokio::test]
    async fn non_image_attachment_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let err = read_attachment(&path).await.unwrap_err();
        assert!(err.to_string().contains("not an image"));
    }
}

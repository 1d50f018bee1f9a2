//! Terminal front end for the chat engine.
//!
//! Renders engine events as a transcript on stdout and turns input lines
//! into `open`/`send` calls. Everything the engine knows arrives through
//! [`ChatEvent`]s; this module never reads engine internals beyond the
//! channel handle.

use std::io::{self, Write};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::engine::{ChatEngine, ChatError};
use crate::events::{ChatEvent, ChatMessageEvent};

const OPERATOR_AVATAR: &str = "/mail/static/src/img/smiley/avatar.jpg";
const QUIT_COMMAND: &str = "/quit";

/// Avatar location for an author. The operator side (`0`) gets the stock
/// avatar.
pub fn avatar_url(origin: &Url, author_id: i64) -> String {
    let base = origin.as_str().trim_end_matches('/');
    if author_id == 0 {
        format!("{base}{OPERATOR_AVATAR}")
    } else {
        format!("{base}/web/image/res.partner/{author_id}/image_small")
    }
}

/// Turns events into printable text, grouping consecutive messages by
/// author.
#[derive(Debug)]
pub struct Transcript {
    origin: Url,
    current_author: Option<(i64, String)>,
}

impl Transcript {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            current_author: None,
        }
    }

    pub fn render(&mut self, event: &ChatEvent) -> String {
        match event {
            ChatEvent::Available => {
                format!("Chat available. Type a message to start, {QUIT_COMMAND} to leave.\n")
            }
            ChatEvent::Message(message) => self.render_message(message),
            ChatEvent::Closed => {
                self.current_author = None;
                "-- chat closed --\n".to_string()
            }
        }
    }

    fn render_message(&mut self, message: &ChatMessageEvent) -> String {
        let author = (message.author_id, message.author_name.clone());
        let mut out = String::new();
        if self.current_author.as_ref() != Some(&author) {
            out.push_str(&format!(
                "{} <{}>\n",
                message.author_name,
                avatar_url(&self.origin, message.author_id)
            ));
            self.current_author = Some(author);
        }
        out.push_str(&format!("  {}\n", message.message));
        out
    }
}

enum Input {
    Quit,
    Skip,
    Send(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim() == QUIT_COMMAND {
        Input::Quit
    } else if line.trim().is_empty() {
        Input::Skip
    } else {
        Input::Send(line.to_string())
    }
}

/// Checks whether the channel is staffed and tells the visitor when it is
/// not. A backend failure is logged and reported as unavailable.
pub async fn announce<W: Write>(engine: &ChatEngine, output: &mut W) -> io::Result<bool> {
    match engine.init().await {
        Ok(true) => Ok(true),
        Ok(false) => {
            writeln!(output, "Nobody is available on this channel right now.")?;
            Ok(false)
        }
        Err(err) => {
            tracing::warn!(target: "livechat::presentation", error = %err, "availability check failed");
            writeln!(output, "The chat service could not be reached.")?;
            Ok(false)
        }
    }
}

/// Runs the transcript until input ends or the visitor quits. The engine
/// must already have been initialised so `Available` is waiting in `events`.
pub async fn run<R, W>(
    engine: ChatEngine,
    mut events: UnboundedReceiver<ChatEvent>,
    input: R,
    mut output: W,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut transcript = Transcript::new(engine.config().origin_server.clone());
    let mut lines = input.lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                output.write_all(transcript.render(&event).as_bytes())?;
                output.flush()?;
                if event == ChatEvent::Available && engine.has_persisted_channel() {
                    match engine.load().await {
                        Ok(resumed) => {
                            tracing::debug!(target: "livechat::presentation", resumed, "silent load finished");
                        }
                        Err(err) => {
                            tracing::warn!(target: "livechat::presentation", error = %err, "silent load failed");
                        }
                    }
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => match parse_input(&line) {
                        Input::Quit => {
                            engine.close();
                            break;
                        }
                        Input::Skip => {}
                        Input::Send(text) => {
                            if let Err(err) = submit(&engine, &text).await {
                                tracing::warn!(target: "livechat::presentation", error = %err, "message not sent");
                                writeln!(output, "!! {err}")?;
                            }
                        }
                    },
                    None => {
                        engine.close();
                        break;
                    }
                }
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        output.write_all(transcript.render(&event).as_bytes())?;
    }
    output.flush()
}

async fn submit(engine: &ChatEngine, text: &str) -> Result<(), ChatError> {
    if engine.channel_uuid().is_none() {
        engine.open().await?;
    }
    engine.send(text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use livechat_proto::{RpcRequest, RpcResponse};
    use reqwest::StatusCode;

    use crate::config::ChatConfig;
    use crate::session::{RpcTransport, SessionError, SessionManager};

    struct UnreachableBackend;

    #[async_trait]
    impl RpcTransport for UnreachableBackend {
        async fn send(
            &self,
            _endpoint: &Url,
            _session_id: Option<&str>,
            _request: &RpcRequest,
        ) -> Result<RpcResponse, SessionError> {
            Err(SessionError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
        }
    }

    fn origin() -> Url {
        Url::parse("https://erp.test/").unwrap()
    }

    fn message(id: i64, author_id: i64, author_name: &str, body: &str) -> ChatEvent {
        ChatEvent::Message(ChatMessageEvent {
            message: body.into(),
            author_id,
            author_name: author_name.into(),
            message_id: id,
        })
    }

    #[test]
    fn avatar_depends_on_author() {
        assert_eq!(
            avatar_url(&origin(), 0),
            "https://erp.test/mail/static/src/img/smiley/avatar.jpg"
        );
        assert_eq!(
            avatar_url(&origin(), 7),
            "https://erp.test/web/image/res.partner/7/image_small"
        );
    }

    #[test]
    fn consecutive_messages_share_one_header() {
        let mut transcript = Transcript::new(origin());
        let first = transcript.render(&message(1, 7, "Alice", "hi"));
        let second = transcript.render(&message(2, 7, "Alice", "still me"));
        let third = transcript.render(&message(3, 0, "Guest", "hello"));

        assert!(first.starts_with("Alice <https://erp.test/web/image/res.partner/7/image_small>\n"));
        assert_eq!(second, "  still me\n");
        assert!(third.starts_with("Guest <"));
    }

    #[test]
    fn closing_resets_grouping() {
        let mut transcript = Transcript::new(origin());
        transcript.render(&message(1, 7, "Alice", "hi"));
        transcript.render(&ChatEvent::Closed);
        assert!(transcript.render(&message(1, 7, "Alice", "hi")).starts_with("Alice <"));
    }

    #[test]
    fn input_lines_are_classified() {
        assert!(matches!(parse_input("/quit\n"), Input::Quit));
        assert!(matches!(parse_input("   \r\n"), Input::Skip));
        match parse_input("  hello there\r\n") {
            Input::Send(text) => assert_eq!(text, "  hello there"),
            _ => panic!("expected a message"),
        }
    }

    #[tokio::test]
    async fn failed_availability_check_is_not_fatal() {
        let config = ChatConfig::builder("http://erp.test").build().unwrap();
        let session =
            SessionManager::with_transport(config.origin_server.clone(), Arc::new(UnreachableBackend));
        let engine = ChatEngine::new(config, session, None, Arc::new(|_: ChatEvent| {}));
        let mut output = Vec::new();

        assert!(!announce(&engine, &mut output).await.unwrap());
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "The chat service could not be reached.\n"
        );
        assert!(matches!(engine.open().await, Err(ChatError::Unavailable)));
    }
}

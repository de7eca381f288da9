//! Chat command table and dispatcher.
//!
//! When a chat rpc in a room starts with `/`, the rpc is canceled
//! (so the text never reaches other players) and the remainder is
//! dispatched here. Replies go back to the caller only, marked to
//! render on the left side of their chat window.

pub mod command;

pub use command::{tokenize, Parameter, Usage, UsageError};

use std::collections::BTreeMap;

use bytes::BytesMut;
use tracing::error;

use crate::protocol::constants::RPC_SEND_CHAT;
use crate::protocol::packet::gamedata::Rpc;
use crate::protocol::packet::{GameDataMessage, HazelEncodable};
use crate::protocol::types::GameCode;

/// Wraps reply texts as chat rpcs for the caller. They are sent from
/// a foreign net id, so the client renders them on the left side of
/// the chat window, visually apart from the caller's own messages.
pub fn reply_children(replies: &[String]) -> Vec<GameDataMessage> {
    replies
        .iter()
        .map(|text| {
            let mut payload = BytesMut::new();
            text.encode_hazel(&mut payload);
            GameDataMessage::Rpc(Rpc {
                net_id: 0,
                call_id: RPC_SEND_CHAT,
                payload: payload.freeze(),
            })
        })
        .collect()
}

/// Failure raised by a command handler.
#[derive(Debug)]
pub enum CommandError {
    /// User-facing: relayed to the caller as a chat reply.
    Call(String),
    /// Anything else: logged with the caller's identity, swallowed.
    Internal(String),
}

/// What a handler sees: the room, the calling player, the original
/// message, and a reply sink.
pub struct CommandContext<'a> {
    pub room_code: GameCode,
    pub caller: i32,
    pub message: &'a str,
    replies: Vec<String>,
}

impl<'a> CommandContext<'a> {
    pub fn new(room_code: GameCode, caller: i32, message: &'a str) -> Self {
        Self {
            room_code,
            caller,
            message,
            replies: Vec::new(),
        }
    }

    /// Queues a chat reply for the caller, left-side marked.
    pub fn reply(&mut self, text: impl Into<String>) {
        self.replies.push(text.into());
    }

    pub fn into_replies(self) -> Vec<String> {
        self.replies
    }
}

pub type Handler =
    Box<dyn Fn(&mut CommandContext<'_>, &BTreeMap<String, String>) -> Result<(), CommandError> + Send + Sync>;

struct Registered {
    usage: Usage,
    description: String,
    /// None for the built-in help command, which needs table access.
    handler: Option<Handler>,
}

/// Registry of chat commands, with `help` built in.
pub struct CommandTable {
    commands: BTreeMap<String, Registered>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        let mut table = Self {
            commands: BTreeMap::new(),
        };
        table.commands.insert(
            "help".to_string(),
            Registered {
                usage: Usage::parse("help [command]").expect("static usage"),
                description: "List registered commands, or detail one".to_string(),
                handler: None,
            },
        );
        table
    }

    pub fn register(
        &mut self,
        usage: &str,
        description: &str,
        handler: Handler,
    ) -> Result<(), UsageError> {
        let usage = Usage::parse(usage)?;
        self.commands.insert(
            usage.name.clone(),
            Registered {
                usage,
                description: description.to_string(),
                handler: Some(handler),
            },
        );
        Ok(())
    }

    pub fn usages(&self) -> impl Iterator<Item = (&Usage, &str)> {
        self.commands
            .values()
            .map(|cmd| (&cmd.usage, cmd.description.as_str()))
    }

    fn describe(cmd: &Registered) -> String {
        if cmd.description.is_empty() {
            format!("/{}", cmd.usage.render())
        } else {
            format!("/{}: {}", cmd.usage.render(), cmd.description)
        }
    }

    /// Binds `tokens` to the declared parameters. `None` means a
    /// required parameter went unfilled.
    fn bind(usage: &Usage, tokens: &[String]) -> Option<BTreeMap<String, String>> {
        let mut bound = BTreeMap::new();
        let mut index = 0usize;
        for param in &usage.params {
            if param.rest {
                if index < tokens.len() {
                    bound.insert(param.name.clone(), tokens[index..].join(" "));
                    index = tokens.len();
                } else if param.required {
                    return None;
                }
            } else if index < tokens.len() {
                bound.insert(param.name.clone(), tokens[index].clone());
                index += 1;
            } else if param.required {
                return None;
            }
        }
        Some(bound)
    }

    /// Dispatches a chat message with the leading `/` already
    /// stripped. Replies accumulate in `ctx`.
    pub fn dispatch(&self, ctx: &mut CommandContext<'_>, message: &str) {
        let tokens = tokenize(message);
        let Some((name, args)) = tokens.split_first() else {
            return;
        };

        let Some(cmd) = self.commands.get(name.as_str()) else {
            ctx.reply(format!("No command with name: {name}"));
            return;
        };

        let Some(bound) = Self::bind(&cmd.usage, args) else {
            ctx.reply(Self::describe(cmd));
            return;
        };

        match &cmd.handler {
            None => self.run_help(ctx, &bound),
            Some(handler) => match handler(ctx, &bound) {
                Ok(()) => {}
                Err(CommandError::Call(text)) => ctx.reply(text),
                Err(CommandError::Internal(text)) => {
                    error!(caller = ctx.caller, command = %name, "command failed: {text}");
                }
            },
        }
    }

    fn run_help(&self, ctx: &mut CommandContext<'_>, args: &BTreeMap<String, String>) {
        match args.get("command") {
            Some(wanted) => match self.commands.get(wanted) {
                Some(cmd) => ctx.reply(Self::describe(cmd)),
                None => ctx.reply(format!("No command with name: {wanted}")),
            },
            None => {
                for cmd in self.commands.values() {
                    ctx.reply(Self::describe(cmd));
                }
            }
        }
    }
}

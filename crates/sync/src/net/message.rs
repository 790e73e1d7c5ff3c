//! Frame walker and command dispatch.
//!
//! A decompressed body is a run of `[command_id][length varint][payload]`
//! frames. Each frame resolves to exactly one typed decoder and is
//! handed to the session handler; any resolution or decode failure is a
//! fatal protocol error and processing of the remaining buffer stops.

use rkyv::api::high::HighValidator;
use rkyv::bytecheck::CheckBytes;
use rkyv::de::Pool;
use rkyv::rancor::{self, Strategy};
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize};

use super::protocol::{
    ContentCheckMsg, DisconnectMsg, EnterGameMsg, EntityRemoveMsg, EntityStateMsg, PrintMsg,
    SectorStateMsg, ServerCommand, ServerMessage, TickMsg, WelcomeMsg, read_varint,
};

/// How many of the most recent frame names accompany a fatal error.
pub const ERROR_CONTEXT_FRAMES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("unknown command id {0}")]
    UnknownCommand(u8),
    #[error("frame header truncated at offset {0}")]
    BadHeader(usize),
    #[error("truncated payload for {command}: {declared} bytes declared, {available} available")]
    Truncated {
        command: &'static str,
        declared: usize,
        available: usize,
    },
    #[error("failed to decode {command}: {source}")]
    Decode {
        command: &'static str,
        #[source]
        source: rancor::Error,
    },
}

/// One entry of the per-step protocol trace.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub command: &'static str,
    pub wire_size: usize,
    pub summary: String,
}

pub trait MessageHandler {
    /// Dispatch stops as soon as this turns false (e.g. a server
    /// disconnect notice mid-buffer).
    fn active(&self) -> bool;

    fn handle(&mut self, message: ServerMessage);
}

/// Walks frames and routes decoded messages. Also keeps an ordered
/// trace of everything decoded during the current simulation step,
/// which the error path and debug overlays read.
#[derive(Debug, Default)]
pub struct Dispatcher {
    step_log: Vec<FrameRecord>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the trace; called once per local simulation step.
    pub fn begin_step(&mut self) {
        self.step_log.clear();
    }

    pub fn step_log(&self) -> &[FrameRecord] {
        &self.step_log
    }

    /// Names of the last few decoded frames, oldest first.
    pub fn recent_commands(&self) -> Vec<&'static str> {
        let skip = self.step_log.len().saturating_sub(ERROR_CONTEXT_FRAMES);
        self.step_log[skip..].iter().map(|r| r.command).collect()
    }

    pub fn dispatch<H: MessageHandler>(
        &mut self,
        body: &[u8],
        handler: &mut H,
    ) -> Result<(), FramingError> {
        let mut pos = 0;
        while pos < body.len() && handler.active() {
            let frame_start = pos;
            let id = body[pos];
            pos += 1;

            let command = ServerCommand::from_u8(id).ok_or(FramingError::UnknownCommand(id))?;
            let declared =
                read_varint(body, &mut pos).ok_or(FramingError::BadHeader(frame_start))? as usize;
            let available = body.len() - pos;
            if declared > available {
                return Err(FramingError::Truncated {
                    command: command.name(),
                    declared,
                    available,
                });
            }
            let payload = &body[pos..pos + declared];
            pos += declared;

            let message = decode_message(command, payload)?;
            self.step_log.push(FrameRecord {
                command: command.name(),
                wire_size: pos - frame_start,
                summary: message.summary(),
            });
            handler.handle(message);
        }
        Ok(())
    }
}

fn decode_message(command: ServerCommand, payload: &[u8]) -> Result<ServerMessage, FramingError> {
    let name = command.name();
    let decoded = match command {
        ServerCommand::Welcome => ServerMessage::Welcome(from_payload::<WelcomeMsg>(payload, name)?),
        ServerCommand::EnterGame => {
            ServerMessage::EnterGame(from_payload::<EnterGameMsg>(payload, name)?)
        }
        ServerCommand::Tick => ServerMessage::Tick(from_payload::<TickMsg>(payload, name)?),
        ServerCommand::EntityState => {
            ServerMessage::EntityState(from_payload::<EntityStateMsg>(payload, name)?)
        }
        ServerCommand::EntityRemove => {
            ServerMessage::EntityRemove(from_payload::<EntityRemoveMsg>(payload, name)?)
        }
        ServerCommand::SectorState => {
            ServerMessage::SectorState(from_payload::<SectorStateMsg>(payload, name)?)
        }
        ServerCommand::ContentCheck => {
            ServerMessage::ContentCheck(from_payload::<ContentCheckMsg>(payload, name)?)
        }
        ServerCommand::Print => ServerMessage::Print(from_payload::<PrintMsg>(payload, name)?),
        ServerCommand::Disconnect => {
            ServerMessage::Disconnect(from_payload::<DisconnectMsg>(payload, name)?)
        }
    };
    Ok(decoded)
}

/// Copies the payload into aligned storage before validation; frame
/// payloads land at arbitrary offsets within the datagram.
fn from_payload<T>(payload: &[u8], command: &'static str) -> Result<T, FramingError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + Deserialize<T, Strategy<Pool, rancor::Error>>,
{
    let mut aligned: AlignedVec = AlignedVec::new();
    aligned.extend_from_slice(payload);
    rkyv::from_bytes::<T, rancor::Error>(&aligned)
        .map_err(|source| FramingError::Decode { command, source })
}

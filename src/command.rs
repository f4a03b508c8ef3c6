//! Command surface (§4.7): the four `NDS` subcommands. The command
//! dispatcher that parses client protocol frames and routes a verb here
//! is an external collaborator (out of scope, §1); this module is the
//! boundary it calls into, and the reply it should send back to the
//! client for each outcome.

use crate::flush::RequestorId;
use crate::runtime::NdsRuntime;

/// One of the four `NDS` subcommands. Anything else is the dispatcher's
/// concern (wrong arity, unknown verb) and never reaches this type.
#[derive(Debug, Clone, Copy)]
pub enum NdsCommand {
    Flush,
    Snapshot,
    Preload,
    ClearStats,
}

/// What the dispatcher should do in response to dispatching a command.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandReply {
    /// Reply immediately with OK.
    Ok,
    /// Reply immediately with an error.
    Error(String),
    /// The reply is deferred; it will arrive later via
    /// [`NdsRuntime::poll_background`] and its `requestor` id.
    Deferred,
}

/// Dispatches `cmd`. `requestor` identifies the client to reply to once
/// a deferred command completes; it is ignored for `Preload` and
/// `ClearStats`, which always reply synchronously. `yield_fn` is the
/// dispatcher's own "process pending file events" primitive, forwarded
/// to [`NdsRuntime::preload`] so a `PRELOAD` walking the whole keyspace
/// still yields to the host event loop; it is unused for every other
/// command.
pub fn dispatch<Y: FnMut()>(
    runtime: &NdsRuntime,
    cmd: NdsCommand,
    requestor: RequestorId,
    yield_fn: Y,
) -> CommandReply {
    match cmd {
        NdsCommand::Flush => match runtime.start_flush(Some(requestor), false) {
            Ok(()) => CommandReply::Deferred,
            Err(err) => CommandReply::Error(err.to_string()),
        },
        NdsCommand::Snapshot => match runtime.start_flush(Some(requestor), true) {
            Ok(()) => CommandReply::Deferred,
            Err(err) => CommandReply::Error(err.to_string()),
        },
        NdsCommand::Preload => match runtime.preload(yield_fn) {
            Ok(()) => CommandReply::Ok,
            Err(err) => CommandReply::Error(err.to_string()),
        },
        NdsCommand::ClearStats => {
            runtime.stats().clear_cache_counters();
            CommandReply::Ok
        }
    }
}

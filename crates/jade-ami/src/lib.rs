//! Client for the telephony manager's text protocol.
//!
//! A [`Session`] owns one TCP connection and drives exactly one outbound
//! call: login, originate, wait for answer, then carry the dialogue as
//! prompt/reply user events. Raw traffic is framed by [`codec`] and folded
//! into [`CallEvent`]s by [`event`].

pub mod codec;
mod config;
pub mod error;
pub mod event;
mod session;

pub use codec::Block;
pub use config::ManagerConfig;
pub use error::{Error, Result, Stage};
pub use event::CallEvent;
pub use session::Session;

#[cfg(test)]
mod tests;

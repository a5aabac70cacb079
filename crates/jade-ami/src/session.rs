//! One manager connection serving one call.
//!
//! Lifecycle:
//!   connect → login → originate → await_answer → (dialogue) → close
//!
//! A session is never shared between calls. [`Session::close`] must run on
//! every exit path; it consumes the session and cannot fail.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use jade_core::dialogue::{DialogueChannel, Reply};
use tokio::{
  io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
  net::TcpStream,
  time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  ManagerConfig,
  codec::{Block, BlockReader, write_block},
  error::{Error, Result, Stage},
  event::{CallEvent, Leg, classify},
};

pub struct Session<S> {
  reader:       BlockReader<ReadHalf<S>>,
  writer:       WriteHalf<S>,
  config:       Arc<ManagerConfig>,
  next_action:  u64,
  leg:          Option<Leg>,
  /// Leg events read while waiting for an action response.
  queued:       VecDeque<CallEvent>,
  connected_at: Option<DateTime<Utc>>,
  hung_up:      bool,
}

impl Session<TcpStream> {
  /// Open a TCP connection to the configured manager.
  pub async fn connect(config: Arc<ManagerConfig>) -> Result<Self> {
    let addr = (config.host.as_str(), config.port);
    let stream = timeout(config.login_timeout(), TcpStream::connect(addr))
      .await
      .map_err(|_| Error::Timeout(Stage::Connect))??;
    debug!(host = %config.host, port = config.port, "manager connection opened");
    Ok(Self::new(stream, config))
  }
}

impl<S: AsyncRead + AsyncWrite + Send> Session<S> {
  /// Wrap an already-open stream.
  pub fn new(stream: S, config: Arc<ManagerConfig>) -> Self {
    let (read, write) = tokio::io::split(stream);
    Self {
      reader: BlockReader::new(read),
      writer: write,
      config,
      next_action: 0,
      leg: None,
      queued: VecDeque::new(),
      connected_at: None,
      hung_up: false,
    }
  }

  /// When the leg first reached the far end (ringing or answered).
  pub fn connected_at(&self) -> Option<DateTime<Utc>> { self.connected_at }

  pub fn leg(&self) -> Option<&Leg> { self.leg.as_ref() }

  fn next_action_id(&mut self) -> String {
    self.next_action += 1;
    format!("jade-{}", self.next_action)
  }

  async fn send(&mut self, block: Block) -> Result<()> {
    write_block(&mut self.writer, &block).await
  }

  async fn next_block(&mut self) -> Result<Block> {
    self.reader.next_block().await?.ok_or(Error::ConnectionClosed)
  }

  /// Send `block` and read until the response carrying `action_id`. Leg
  /// events that arrive first are queued, not dropped.
  async fn request(&mut self, block: Block, action_id: &str) -> Result<Block> {
    self.send(block).await?;
    loop {
      let block = self.next_block().await?;
      if block.response().is_some() && block.action_id() == Some(action_id) {
        return Ok(block);
      }
      if let Some(event) = self.track(&block) {
        self.queued.push_back(event);
      }
    }
  }

  /// Classify a block if it concerns our leg, updating connection state.
  fn track(&mut self, block: &Block) -> Option<CallEvent> {
    let leg = self.leg.as_mut()?;
    if !leg.owns(block) {
      return None;
    }
    leg.learn_channel(block);
    let event = classify(block)?;
    match &event {
      CallEvent::Connected | CallEvent::Answered => {
        self.connected_at.get_or_insert_with(Utc::now);
      }
      CallEvent::HungUp => self.hung_up = true,
      CallEvent::Failed(_) => {}
    }
    Some(event)
  }

  // ─── Actions ─────────────────────────────────────────────────────────────

  /// Authenticate. A refusal is [`Error::Authentication`].
  pub async fn login(&mut self) -> Result<()> {
    let id = self.next_action_id();
    let block = Block::action("Login")
      .with("ActionID", &id)
      .with("Username", &self.config.username)
      .with("Secret", &self.config.secret)
      .with("Events", "on");

    let reply = timeout(self.config.login_timeout(), self.request(block, &id))
      .await
      .map_err(|_| Error::Timeout(Stage::Login))??;

    if is_success(&reply) {
      debug!(username = %self.config.username, "manager login accepted");
      Ok(())
    } else {
      let message = reply.get("Message").unwrap_or("authentication failed");
      Err(Error::Authentication(message.to_owned()))
    }
  }

  /// Place an asynchronous outbound call to `number` on behalf of `call_id`.
  ///
  /// Returns once the manager has accepted the request; progress arrives as
  /// events (see [`Session::next_event`]).
  pub async fn originate(&mut self, number: &str, call_id: Uuid) -> Result<()> {
    let action_id = self.next_action_id();
    let channel_id = Uuid::new_v4().to_string();
    let exten = self.config.exten_for(call_id);
    let block = Block::action("Originate")
      .with("ActionID", &action_id)
      .with("Channel", self.config.channel_for(number))
      .with("Context", &self.config.context)
      .with("Exten", &exten)
      .with("Priority", "1")
      .with("CallerID", format!("{} <{exten}>", self.config.caller_id))
      .with("Async", "true")
      .with("ChannelId", &channel_id)
      .with("Variable", format!("JADE_CALL_ID={call_id}"))
      .with("Timeout", self.config.originate_timeout().as_millis().to_string());

    // Known before the response so that early events are recognised.
    self.leg = Some(Leg { channel_id, action_id: action_id.clone(), channel: None });

    let within = self.config.login_timeout();
    let reply = timeout(within, self.request(block, &action_id))
      .await
      .map_err(|_| Error::Timeout(Stage::Originate))??;

    if is_success(&reply) {
      info!(%call_id, "call originated");
      Ok(())
    } else {
      self.leg = None;
      let message = reply.get("Message").unwrap_or("originate failed");
      Err(Error::OriginateRejected(message.to_owned()))
    }
  }

  /// The next event about our leg. Waits indefinitely; callers bound it with
  /// a timeout. Cancel-safe.
  pub async fn next_event(&mut self) -> Result<CallEvent> {
    if self.leg.is_none() {
      return Err(Error::NoLeg);
    }
    if let Some(event) = self.queued.pop_front() {
      return Ok(event);
    }
    loop {
      let block = self.next_block().await?;
      if let Some(event) = self.track(&block) {
        return Ok(event);
      }
    }
  }

  /// Wait for the patient to pick up.
  pub async fn await_answer(&mut self) -> Result<()> {
    let within = self.config.answer_timeout();
    let wait = async {
      loop {
        match self.next_event().await? {
          CallEvent::Connected => debug!("leg ringing"),
          CallEvent::Answered => return Ok(()),
          CallEvent::Failed(reason) => return Err(Error::CallFailed(reason)),
          CallEvent::HungUp => return Err(Error::HungUp),
        }
      }
    };
    timeout(within, wait).await.map_err(|_| Error::Timeout(Stage::Answer))?
  }

  // ─── Dialogue transport ──────────────────────────────────────────────────

  async fn prompt(&mut self, text: &str, expect_reply: bool) -> Result<()> {
    if self.hung_up {
      return Err(Error::HungUp);
    }
    let leg = self.leg.as_ref().ok_or(Error::NoLeg)?;
    let channel = leg.channel.clone().unwrap_or_else(|| leg.channel_id.clone());
    let unique_id = leg.channel_id.clone();
    let id = self.next_action_id();
    let block = Block::action("UserEvent")
      .with("ActionID", id)
      .with("UserEvent", "JadePrompt")
      .with("Channel", channel)
      .with("Uniqueid", unique_id)
      .with("Text", text)
      .with("Expect", if expect_reply { "reply" } else { "none" });
    self.send(block).await
  }

  /// The patient's next reply. Silence until the reply timeout is
  /// [`Reply::NoInput`]; a hang-up is an error.
  async fn reply(&mut self) -> Result<Reply> {
    while let Some(event) = self.queued.pop_front() {
      if matches!(event, CallEvent::HungUp | CallEvent::Failed(_)) {
        return Err(Error::HungUp);
      }
    }

    let within = self.config.reply_timeout();
    let wait = async {
      loop {
        let block = self.next_block().await?;
        let ours = self.leg.as_ref().is_some_and(|leg| leg.owns(&block));
        if !ours {
          continue;
        }
        if block.event() == Some("UserEvent") {
          match block.get("UserEvent") {
            Some("JadeReply") => {
              let text = block.get("Text").unwrap_or_default();
              return Ok(Reply::Text(text.to_owned()));
            }
            Some("JadeNoInput") => return Ok(Reply::NoInput),
            _ => continue,
          }
        }
        if let Some(CallEvent::HungUp | CallEvent::Failed(_)) = self.track(&block) {
          return Err(Error::HungUp);
        }
      }
    };
    match timeout(within, wait).await {
      Ok(reply) => reply,
      Err(_) => Ok(Reply::NoInput),
    }
  }

  // ─── Teardown ────────────────────────────────────────────────────────────

  /// Hang up the leg if it is still up, log off, and shut the socket.
  /// Failures are logged; there is nothing left to do about them.
  pub async fn close(mut self) {
    let within = self.config.login_timeout();
    let hung_up = self.hung_up;
    let teardown = async {
      if let Some(leg) = self.leg.take().filter(|_| !hung_up) {
        let channel = leg.channel.unwrap_or(leg.channel_id);
        let id = self.next_action_id();
        self
          .send(Block::action("Hangup").with("ActionID", id).with("Channel", channel))
          .await?;
      }
      let id = self.next_action_id();
      self.send(Block::action("Logoff").with("ActionID", id)).await?;
      self.writer.shutdown().await?;
      Ok::<_, Error>(())
    };

    match timeout(within, teardown).await {
      Ok(Ok(())) => debug!("manager session closed"),
      Ok(Err(e)) => warn!(error = %e, "manager session teardown failed"),
      Err(_) => warn!(error = %Error::Timeout(Stage::Teardown), "manager session teardown failed"),
    }
  }
}

fn is_success(reply: &Block) -> bool {
  reply.response().is_some_and(|r| r.eq_ignore_ascii_case("Success"))
}

impl<S: AsyncRead + AsyncWrite + Send> DialogueChannel for Session<S> {
  type Error = Error;

  async fn say(&mut self, text: &str) -> Result<()> { self.prompt(text, false).await }

  async fn ask(&mut self, prompt: &str) -> Result<Reply> {
    self.prompt(prompt, true).await?;
    self.reply().await
  }
}

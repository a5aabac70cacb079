use std::{collections::VecDeque, sync::Arc};

use chrono::NaiveDate;
use jade_core::{
  dialogue::{self, DialogueChannel, Reply, Script, ScriptSettings},
  patient::Patient,
};
use tokio::{
  io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf, duplex},
  net::TcpListener,
  task::JoinHandle,
};
use uuid::Uuid;

use crate::{
  Block, Error, ManagerConfig, Session, Stage,
  codec::{BlockReader, write_block},
};

// ─── Fake manager ────────────────────────────────────────────────────────────

/// The server end of a session, driven step by step from a test task.
struct Fake<S> {
  reader: BlockReader<ReadHalf<S>>,
  writer: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite> Fake<S> {
  async fn start(stream: S) -> Self {
    let (read, write) = tokio::io::split(stream);
    let mut fake = Self { reader: BlockReader::new(read), writer: write };
    use tokio::io::AsyncWriteExt as _;
    fake.writer.write_all(b"Asterisk Call Manager/5.0.1\r\n").await.unwrap();
    fake
  }

  async fn recv(&mut self) -> Option<Block> { self.reader.next_block().await.unwrap() }

  async fn expect(&mut self, action: &str) -> Block {
    let block = self.recv().await.expect("client closed early");
    assert_eq!(block.get("Action"), Some(action), "{block:?}");
    block
  }

  async fn send(&mut self, block: Block) { write_block(&mut self.writer, &block).await.unwrap() }

  async fn respond(&mut self, to: &Block, response: &str, message: &str) {
    let id = to.action_id().unwrap().to_owned();
    self
      .send(
        Block::default()
          .with("Response", response)
          .with("ActionID", id)
          .with("Message", message),
      )
      .await;
  }

  async fn accept_login(&mut self) {
    let login = self.expect("Login").await;
    assert_eq!(login.get("Username"), Some("jade"));
    assert_eq!(login.get("Secret"), Some("s3cret"));
    self.respond(&login, "Success", "Authentication accepted").await;
  }

  /// Accept the originate and return the leg's unique id.
  async fn accept_originate(&mut self) -> String {
    let originate = self.expect("Originate").await;
    self.respond(&originate, "Success", "Originate successfully queued").await;
    originate.get("ChannelId").unwrap().to_owned()
  }

  async fn leg_event(&mut self, leg: &str, event: &str, extra: &[(&str, &str)]) {
    let mut block = Block::default().with("Event", event).with("Uniqueid", leg);
    for (k, v) in extra {
      block.push(k, v);
    }
    self.send(block).await;
  }

  async fn answer(&mut self, leg: &str) {
    self
      .leg_event(leg, "Newstate", &[("ChannelStateDesc", "Ringing"), ("Channel", "SIP/0601-00000001")])
      .await;
    self.leg_event(leg, "Newstate", &[("ChannelStateDesc", "Up")]).await;
  }

  /// Every remaining action name until the client closes the stream.
  async fn drain(&mut self) -> Vec<String> {
    let mut actions = Vec::new();
    while let Some(block) = self.recv().await {
      actions.push(block.get("Action").unwrap_or_default().to_owned());
    }
    actions
  }
}

fn config() -> Arc<ManagerConfig> {
  Arc::new(ManagerConfig {
    username: "jade".into(),
    secret: "s3cret".into(),
    ..ManagerConfig::default()
  })
}

fn pair() -> (Session<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
  let (client, server) = duplex(64 * 1024);
  (Session::new(client, config()), server)
}

// ─── Login / originate / teardown ────────────────────────────────────────────

#[tokio::test]
async fn answered_call_then_clean_teardown() {
  let (mut session, server) = pair();
  let call_id = Uuid::new_v4();

  let manager: JoinHandle<(Block, Vec<String>)> = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.accept_login().await;
    let originate = fake.expect("Originate").await;
    fake.respond(&originate, "Success", "Originate successfully queued").await;
    let leg = originate.get("ChannelId").unwrap().to_owned();
    // Someone else's call on the same manager.
    fake.leg_event("other-leg", "Hangup", &[]).await;
    fake.answer(&leg).await;
    (originate, fake.drain().await)
  });

  session.login().await.unwrap();
  session.originate("06 01 02 03 04", call_id).await.unwrap();
  session.await_answer().await.unwrap();
  assert!(session.connected_at().is_some());
  assert_eq!(
    session.leg().and_then(|l| l.channel.as_deref()),
    Some("SIP/0601-00000001")
  );
  session.close().await;

  let (originate, after) = manager.await.unwrap();
  assert_eq!(originate.get("Channel"), Some("SIP/0601020304"));
  assert_eq!(originate.get("Context"), Some("jade-followup"));
  assert_eq!(originate.get("Priority"), Some("1"));
  assert_eq!(originate.get("Async"), Some("true"));
  assert_eq!(originate.get("Timeout"), Some("30000"));
  assert_eq!(
    originate.get("Variable"),
    Some(format!("JADE_CALL_ID={call_id}").as_str())
  );
  assert_eq!(after, vec!["Hangup", "Logoff"]);
}

#[tokio::test]
async fn rejected_login_is_an_authentication_error() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    let login = fake.expect("Login").await;
    fake.respond(&login, "Error", "Authentication failed").await;
    fake.drain().await
  });

  let err = session.login().await.unwrap_err();
  assert!(err.is_authentication());
  assert!(matches!(&err, Error::Authentication(m) if m == "Authentication failed"));
  session.close().await;

  // No leg, so no Hangup; the session is still logged off.
  assert_eq!(manager.await.unwrap(), vec!["Logoff"]);
}

#[tokio::test(start_paused = true)]
async fn silent_manager_times_out_login() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.expect("Login").await;
    fake.drain().await
  });

  let err = session.login().await.unwrap_err();
  assert!(matches!(err, Error::Timeout(Stage::Login)));
  session.close().await;
  assert_eq!(manager.await.unwrap(), vec!["Logoff"]);
}

#[tokio::test]
async fn originate_failure_is_reported_with_reason() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.accept_login().await;
    let originate = fake.expect("Originate").await;
    fake.respond(&originate, "Success", "Originate successfully queued").await;
    fake
      .send(
        Block::default()
          .with("Event", "OriginateResponse")
          .with("ActionID", originate.action_id().unwrap())
          .with("Response", "Failure")
          .with("Reason", "5"),
      )
      .await;
    fake.drain().await
  });

  session.login().await.unwrap();
  session.originate("0601020304", Uuid::new_v4()).await.unwrap();
  let err = session.await_answer().await.unwrap_err();
  assert!(matches!(&err, Error::CallFailed(r) if r == "busy"), "{err:?}");
  assert!(session.connected_at().is_none());
  session.close().await;

  assert_eq!(manager.await.unwrap(), vec!["Hangup", "Logoff"]);
}

#[tokio::test]
async fn rejected_originate_leaves_no_leg() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.accept_login().await;
    let originate = fake.expect("Originate").await;
    fake.respond(&originate, "Error", "Permission denied").await;
    fake.drain().await
  });

  session.login().await.unwrap();
  let err = session.originate("0601020304", Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::OriginateRejected(_)));
  assert!(session.leg().is_none());
  session.close().await;
  assert_eq!(manager.await.unwrap(), vec!["Logoff"]);
}

#[tokio::test]
async fn manager_disconnect_is_an_error() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.expect("Login").await;
    // Dropping the fake closes the stream.
  });

  let err = session.login().await.unwrap_err();
  assert!(matches!(err, Error::ConnectionClosed | Error::Io(_)), "{err:?}");
  manager.await.unwrap();
  session.close().await;
}

// ─── Dialogue over a live leg ────────────────────────────────────────────────

/// Answer each prompt that expects a reply with the next canned line; an
/// empty line is a no-input event and running out is a hang-up.
async fn converse<S: AsyncRead + AsyncWrite>(
  fake: &mut Fake<S>,
  leg: &str,
  mut replies: VecDeque<&'static str>,
) -> Vec<String> {
  let mut heard = Vec::new();
  while let Some(block) = fake.recv().await {
    match block.get("Action") {
      Some("UserEvent") => {
        assert_eq!(block.get("Uniqueid"), Some(leg));
        heard.push(block.get("Text").unwrap_or_default().to_owned());
        if block.get("Expect") != Some("reply") {
          continue;
        }
        match replies.pop_front() {
          Some("") => fake.leg_event(leg, "UserEvent", &[("UserEvent", "JadeNoInput")]).await,
          Some(text) => {
            fake
              .leg_event(leg, "UserEvent", &[("UserEvent", "JadeReply"), ("Text", text)])
              .await
          }
          None => fake.leg_event(leg, "Hangup", &[("Cause", "16")]).await,
        }
      }
      Some("Logoff") => break,
      _ => {}
    }
  }
  heard
}

fn patient() -> Patient {
  Patient {
    patient_id: "P-1".into(),
    first_name: "Marie".into(),
    last_name:  "Durand".into(),
    birth_date: NaiveDate::from_ymd_opt(1954, 3, 12),
    phone:      Some("0601020304".into()),
  }
}

#[tokio::test]
async fn full_dialogue_over_the_wire() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.accept_login().await;
    let leg = fake.accept_originate().await;
    fake.answer(&leg).await;
    let replies = ["12/03/1954", "4", "knee", "yes", "yes", "8", "no", ""];
    converse(&mut fake, &leg, replies.into_iter().collect()).await
  });

  session.login().await.unwrap();
  session.originate("0601020304", Uuid::new_v4()).await.unwrap();
  session.await_answer().await.unwrap();
  let script = Script::standard(ScriptSettings::default());
  let capture = dialogue::run(&script, &mut session, &patient()).await;
  session.close().await;

  assert!(capture.complete, "{capture:?}");
  assert_eq!(capture.pain_level, Some(4));
  assert_eq!(capture.pain_location.as_deref(), Some("knee"));
  assert_eq!(capture.other_complaints, None);

  let heard = manager.await.unwrap();
  assert!(heard[0].contains("Marie Durand"));
  assert!(heard.last().unwrap().starts_with("Thank you Marie"));
}

#[tokio::test]
async fn hang_up_during_dialogue_ends_the_capture() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.accept_login().await;
    let leg = fake.accept_originate().await;
    fake.answer(&leg).await;
    converse(&mut fake, &leg, ["12/03/1954"].into_iter().collect()).await;
  });

  session.login().await.unwrap();
  session.originate("0601020304", Uuid::new_v4()).await.unwrap();
  session.await_answer().await.unwrap();
  let script = Script::standard(ScriptSettings::default());
  let capture = dialogue::run(&script, &mut session, &patient()).await;

  assert!(!capture.complete);
  assert!(capture.identity_verified);
  assert_eq!(capture.ended_early.as_deref(), Some("patient hung up"));
  // Further prompts fail fast once the leg is gone.
  assert!(matches!(session.say("hello?").await, Err(Error::HungUp)));
  session.close().await;
  manager.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn silence_after_a_prompt_is_no_input() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.accept_login().await;
    let leg = fake.accept_originate().await;
    fake.answer(&leg).await;
    fake.drain().await
  });

  session.login().await.unwrap();
  session.originate("0601020304", Uuid::new_v4()).await.unwrap();
  session.await_answer().await.unwrap();
  assert_eq!(session.ask("Anything else?").await.unwrap(), Reply::NoInput);
  session.close().await;
  assert_eq!(manager.await.unwrap(), vec!["UserEvent", "Hangup", "Logoff"]);
}

// ─── Real sockets ────────────────────────────────────────────────────────────

#[tokio::test]
async fn connects_over_tcp() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  let manager = tokio::spawn(async move {
    let (stream, _) = listener.accept().await.unwrap();
    let mut fake = Fake::start(stream).await;
    fake.accept_login().await;
    fake.drain().await
  });

  let config = Arc::new(ManagerConfig { port, ..(*config()).clone() });
  let mut session = Session::connect(config).await.unwrap();
  session.login().await.unwrap();
  session.close().await;
  assert_eq!(manager.await.unwrap(), vec!["Logoff"]);
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out() {
  let (mut session, server) = pair();
  let manager = tokio::spawn(async move {
    let mut fake = Fake::start(server).await;
    fake.accept_login().await;
    let leg = fake.accept_originate().await;
    fake
      .leg_event(&leg, "Newstate", &[("ChannelStateDesc", "Ringing")])
      .await;
    fake.drain().await
  });

  session.login().await.unwrap();
  session.originate("0601020304", Uuid::new_v4()).await.unwrap();
  let err = session.await_answer().await.unwrap_err();
  assert!(matches!(err, Error::Timeout(Stage::Answer)));
  // Ringing counts as reaching the line.
  assert!(session.connected_at().is_some());
  session.close().await;
  assert_eq!(manager.await.unwrap(), vec!["Hangup", "Logoff"]);
}

//! Drives the echo server's pipeline from an in-memory client pipeline.

use std::time::{Duration, Instant};

use conduit::{Pipeline, PipelineConfig, PipelineError};
use conduit_codec::DEFAULT_MAX_OBJECT_SIZE;
use conduit_demos::{Reply, Request, add_object_codec, echo_pipeline};

const IDLE: Duration = Duration::from_secs(30);

struct Peers {
    client: Pipeline,
    server: Pipeline,
    seq: u64,
}

impl Peers {
    fn new() -> Result<Self, PipelineError> {
        let client = Pipeline::with_config(PipelineConfig::default().with_name("client"));
        add_object_codec::<Reply, Request>(&client, DEFAULT_MAX_OBJECT_SIZE)?;
        Ok(Self {
            client,
            server: echo_pipeline(IDLE, DEFAULT_MAX_OBJECT_SIZE, "server")?,
            seq: 0,
        })
    }

    /// Sends one line and returns the replies it produced.
    fn send(&mut self, text: &str) -> Vec<Reply> {
        self.seq += 1;
        self.client.write_and_flush(Box::new(Request {
            seq: self.seq,
            text: text.to_owned(),
        }));
        while let Some(frame) = self.client.poll_write() {
            self.server.handle_read(&frame);
        }
        while let Some(frame) = self.server.poll_write() {
            self.client.handle_read(&frame);
        }
        self.client
            .take_inbound_messages()
            .into_iter()
            .map(|m| *m.downcast::<Reply>().unwrap())
            .collect()
    }
}

#[test]
fn requests_are_echoed_with_the_current_stages() -> Result<(), PipelineError> {
    let mut peers = Peers::new()?;
    let replies = peers.send("hello");
    assert_eq!(
        replies,
        [Reply {
            seq: 1,
            text: "hello".to_owned(),
            stages: vec!["decoder".to_owned(), "encoder".to_owned(), "echo".to_owned()],
        }]
    );
    Ok(())
}

#[test]
fn commands_reconfigure_the_running_pipeline() -> Result<(), PipelineError> {
    let mut peers = Peers::new()?;

    peers.send("/shout");
    assert_eq!(peers.server.names(), ["decoder", "encoder", "shout", "echo"]);
    let replies = peers.send("hi");
    assert_eq!(replies[0].text, "HI");
    assert!(replies[0].stages.iter().any(|s| s == "shout"));

    // the command still matches once upper-cased
    peers.send("/quiet");
    assert!(!peers.server.contains("shout"));
    assert_eq!(peers.send("hi")[0].text, "hi");

    let replies = peers.send("/bye");
    assert_eq!(replies[0].text, "/bye");
    assert!(peers.server.is_closed());
    Ok(())
}

#[test]
fn idle_connection_is_closed_at_its_deadline() -> Result<(), PipelineError> {
    let peers = Peers::new()?;
    let mut eto = Instant::now() + Duration::from_secs(3600);
    peers.server.poll_timeout(&mut eto);
    assert!(eto <= Instant::now() + IDLE);

    peers.server.handle_timeout(eto - Duration::from_millis(1));
    assert!(!peers.server.is_closed());
    peers.server.handle_timeout(eto);
    assert!(peers.server.is_closed());
    Ok(())
}

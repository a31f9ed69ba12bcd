pub mod error;
pub mod protocol;
pub mod runner;
pub mod scanner;
pub mod session;
pub mod ssdp;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::app_config::AppConfig;
    use crate::domain::device::{LightDescriptor, LightState};
    use crate::domain::events::LightEvent;
    use crate::light::session::DeviceSession;
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::TcpListener;
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// The device end of the wire, reading CRLF frames off the socket a
    /// session writes to and answering on the same connection.
    pub struct Peer {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Peer {
        pub async fn accept(listener: &TcpListener) -> Peer {
            let (stream, _) = listener.accept().await.expect("accept failed");
            let (read, writer) = stream.into_split();
            Peer {
                lines: BufReader::new(read).lines(),
                writer,
            }
        }

        pub async fn next_request(&mut self) -> Value {
            let line = timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .expect("no request within two seconds")
                .expect("read failed")
                .expect("connection closed");
            serde_json::from_str(&line).expect("request is not valid JSON")
        }

        pub async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .expect("write failed");
        }

        /// True when the session writes nothing for the whole window.
        pub async fn silent_for(&mut self, window: Duration) -> bool {
            timeout(window, self.lines.next_line()).await.is_err()
        }
    }

    pub fn descriptor_for(addr: SocketAddr) -> LightDescriptor {
        LightDescriptor {
            id: "0xtest".to_string(),
            name: "test light".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        }
    }

    /// A session connected to an in-process peer, with the event channel
    /// it reports into.
    pub async fn connected_session(config: AppConfig) -> (DeviceSession, Peer, mpsc::Receiver<LightEvent>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local address");
        let (tx, rx) = mpsc::channel(64);

        let session = DeviceSession::new(descriptor_for(addr), LightState::default(), Arc::new(config), tx);
        session.connect().await;
        let peer = Peer::accept(&listener).await;
        assert!(session.is_connected().await);

        (session, peer, rx)
    }

    pub async fn drain_until_state(rx: &mut mpsc::Receiver<LightEvent>) -> LightState {
        timeout(Duration::from_secs(2), async {
            loop {
                if let LightEvent::StateChanged { state, .. } = rx.recv().await.expect("event channel closed") {
                    return state;
                }
            }
        })
        .await
        .expect("no state change within two seconds")
    }

    /// A plausible discovery reply pointing at a local listener.
    pub fn reply_for(id: &str, addr: SocketAddr, name: &str) -> String {
        [
            "HTTP/1.1 200 OK".to_string(),
            format!("Location: yeelight://{addr}"),
            format!("id: {id}"),
            "model: color".to_string(),
            "fw_ver: 18".to_string(),
            "support: get_prop set_power set_bright set_ct_abx set_rgb set_hsv".to_string(),
            "power: on".to_string(),
            "bright: 100".to_string(),
            format!("name: {name}"),
        ]
        .join("\r\n")
    }
}

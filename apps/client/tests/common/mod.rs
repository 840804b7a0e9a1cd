#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chatty_client::conversations::ConversationStore;
use chatty_client::error::TransportError;
use chatty_client::session::{self, SessionEvent, SessionHandle, SessionTiming};
use chatty_client::transport::{memory_pair, Connector, Link, MemoryPeer, LINK_CAPACITY};
use chatty_crypto::identity::Identity;
use chatty_crypto::storage::MemoryStore;
use chatty_crypto::trust::TrustStore;
use chatty_shared::api::ws::{ClientAction, ClientFrame, ServerFrame};
use chatty_shared::codec::{parse_envelope, serialize_envelope};
use chatty_shared::constants::MIN_RSA_KEY_BITS;
use chatty_shared::ids::UserId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Three cached identities; RSA generation is too slow to repeat per test.
pub fn identities() -> &'static [Identity; 3] {
    static IDENTITIES: OnceLock<[Identity; 3]> = OnceLock::new();
    IDENTITIES.get_or_init(|| {
        std::array::from_fn(|_| Identity::generate(UserId::new(), MIN_RSA_KEY_BITS).unwrap())
    })
}

pub fn alice() -> Identity {
    identities()[0].clone()
}

pub fn bob() -> Identity {
    identities()[1].clone()
}

pub fn mallory() -> Identity {
    identities()[2].clone()
}

/// Hands out pre-built links in order, then fails every further attempt.
pub struct ScriptedConnector {
    links: Mutex<VecDeque<Link>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(links: Vec<Link>) -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(links.into()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::ConnectionFailed("no link scripted".into()))
    }
}

pub struct TestSession {
    pub handle: SessionHandle,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub task: JoinHandle<()>,
    pub store: Arc<MemoryStore>,
}

/// Spawn a session over an empty in-memory store. `trusted` peers are
/// accepted into the trust table beforehand.
pub async fn start_session(
    identity: Identity,
    trusted: &[&Identity],
    connector: Arc<dyn Connector>,
) -> TestSession {
    let store = Arc::new(MemoryStore::new());
    let mut trust = TrustStore::load(store.clone()).await.unwrap();
    for peer in trusted {
        let request = trust
            .begin_verification(peer.user_id(), peer.sign_public_key().clone())
            .unwrap();
        trust.accept_verification(&request).await.unwrap();
    }
    let conversations = ConversationStore::load(store.clone()).await.unwrap();
    let (handle, events, task) = session::spawn(
        SessionTiming::default(),
        identity,
        trust,
        conversations,
        connector,
    );
    TestSession {
        handle,
        events,
        task,
        store,
    }
}

/// Session over a single scripted in-memory link.
pub async fn connected_session(
    identity: Identity,
    trusted: &[&Identity],
) -> (TestSession, MemoryPeer) {
    let (link, mut peer) = memory_pair(LINK_CAPACITY);
    let session = start_session(identity, trusted, ScriptedConnector::new(vec![link])).await;
    // auth, updatePub, updateSign, first ping
    for _ in 0..4 {
        next_frame(&mut peer).await;
    }
    (session, peer)
}

pub async fn next_frame(peer: &mut MemoryPeer) -> ClientFrame {
    let text = tokio::time::timeout(Duration::from_secs(60), peer.recv_frame())
        .await
        .expect("timed out waiting for a client frame")
        .expect("link dropped");
    parse_envelope(&text).unwrap()
}

/// Next frame that is neither authentication nor heartbeat.
pub async fn next_action(peer: &mut MemoryPeer) -> ClientAction {
    loop {
        match next_frame(peer).await {
            ClientFrame::Action(ClientAction::Ping) | ClientFrame::Auth { .. } => continue,
            ClientFrame::Action(action) => return action,
        }
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("session ended")
}

pub async fn deliver(peer: &MemoryPeer, frame: &ServerFrame) {
    peer.send_frame(serialize_envelope(frame).unwrap())
        .await
        .unwrap();
}

/// What the relay makes of a `sendTxt` from `sender`.
pub fn relayed(action: ClientAction, sender: UserId) -> ServerFrame {
    match action {
        ClientAction::SendTxt {
            data,
            iv,
            gid,
            id,
            key,
            sig,
        } => ServerFrame::TxtMsg {
            data,
            iv,
            gid,
            uid: sender,
            target: id,
            key,
            sig,
        },
        other => panic!("expected SendTxt, got {other:?}"),
    }
}

#[derive(Default)]
struct RelayState {
    routes: HashMap<UserId, mpsc::UnboundedSender<String>>,
    encrypt_keys: HashMap<UserId, String>,
    sign_keys: HashMap<UserId, String>,
}

/// In-process relay: routes messages between authenticated links and
/// answers key lookups from announced keys.
#[derive(Default)]
pub struct Relay {
    state: Mutex<RelayState>,
}

impl Relay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<RelayConnector> {
        Arc::new(RelayConnector {
            relay: self.clone(),
        })
    }

    /// Wait until `user` has announced both public keys.
    pub async fn wait_for_keys(&self, user: UserId) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                {
                    let state = self.state.lock().unwrap();
                    if state.encrypt_keys.contains_key(&user) && state.sign_keys.contains_key(&user)
                    {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("keys never announced");
    }

    async fn serve(self: Arc<Self>, mut peer: MemoryPeer) {
        let (route_tx, mut route_rx) = mpsc::unbounded_channel();
        let mut user = None;

        loop {
            tokio::select! {
                frame = peer.recv_frame() => {
                    let Some(text) = frame else { break };
                    let replies = self.handle(&text, &mut user, &route_tx);
                    for reply in replies {
                        if peer.send_frame(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(forwarded) = route_rx.recv() => {
                    if peer.send_frame(forwarded).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(user) = user {
            self.state.lock().unwrap().routes.remove(&user);
        }
    }

    fn handle(
        &self,
        text: &str,
        user: &mut Option<UserId>,
        route: &mpsc::UnboundedSender<String>,
    ) -> Vec<String> {
        let Ok(frame) = parse_envelope::<ClientFrame>(text) else {
            return Vec::new();
        };
        let mut state = self.state.lock().unwrap();

        let action = match frame {
            ClientFrame::Auth { uid } => {
                *user = Some(uid);
                state.routes.insert(uid, route.clone());
                return Vec::new();
            }
            ClientFrame::Action(action) => action,
        };
        let Some(me) = *user else {
            return Vec::new();
        };

        let reply = match action {
            ClientAction::UpdatePub { key } => {
                state.encrypt_keys.insert(me, key);
                None
            }
            ClientAction::UpdateSign { key } => {
                state.sign_keys.insert(me, key);
                None
            }
            ClientAction::Ping => Some(ServerFrame::Pong),
            send @ ClientAction::SendTxt { .. } => {
                let frame = relayed(send, me);
                if let ServerFrame::TxtMsg { target, .. } = &frame {
                    if let Some(route) = state.routes.get(target) {
                        let _ = route.send(serialize_envelope(&frame).unwrap());
                    }
                }
                None
            }
            ClientAction::GetPub { uid } => {
                state
                    .encrypt_keys
                    .get(&uid)
                    .map(|key| ServerFrame::PubKey {
                        uid,
                        public_key: key.clone(),
                    })
            }
            ClientAction::GetSignPub { target } => {
                state
                    .sign_keys
                    .get(&target)
                    .map(|key| ServerFrame::SignKey {
                        uid: target,
                        public_key: key.clone(),
                    })
            }
        };

        reply
            .into_iter()
            .map(|frame| serialize_envelope(&frame).unwrap())
            .collect()
    }
}

pub struct RelayConnector {
    relay: Arc<Relay>,
}

#[async_trait]
impl Connector for RelayConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (link, peer) = memory_pair(LINK_CAPACITY);
        tokio::spawn(self.relay.clone().serve(peer));
        Ok(link)
    }
}

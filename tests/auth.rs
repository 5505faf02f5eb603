// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! End-to-end authentication exchanges against a scripted transport.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use ssh_userauth::agent::{Agent, AgentIdentity};
use ssh_userauth::auth::MethodSet;
use ssh_userauth::client::{AuthStatus, Config, Session};
use ssh_userauth::encoding::{Encoding, Reader};
use ssh_userauth::key::{KeyStore, PrivateKey, Prompt, PubKey};
use ssh_userauth::transport::Transport;
use ssh_userauth::{msg, CryptoVec, Error};

const SESSION_ID: &[u8] = b"first-kex-exchange-hash";

/// A transport whose incoming packets are scripted by the test.
struct StubTransport {
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    /// Report would-block this many times before reading on.
    block_reads: usize,
    service_requests: Vec<String>,
    delayed_compression: bool,
    compression_active: bool,
}

impl StubTransport {
    fn new() -> Self {
        StubTransport {
            incoming: VecDeque::new(),
            sent: Vec::new(),
            block_reads: 0,
            service_requests: Vec::new(),
            delayed_compression: false,
            compression_active: false,
        }
    }

    fn queue(&mut self, payload: Vec<u8>) {
        self.incoming.push_back(payload)
    }
}

impl Transport for StubTransport {
    fn request_service(&mut self, name: &str) -> Result<bool, Error> {
        self.service_requests.push(name.to_string());
        Ok(true)
    }
    fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.sent.push(payload.to_vec());
        Ok(())
    }
    fn read_packet(&mut self, _timeout: Option<Duration>) -> Result<Option<Vec<u8>>, Error> {
        if self.block_reads > 0 {
            self.block_reads -= 1;
            return Ok(None);
        }
        match self.incoming.pop_front() {
            Some(payload) => Ok(Some(payload)),
            None => Err(Error::ConnectionTimeout),
        }
    }
    fn session_id(&self) -> &[u8] {
        SESSION_ID
    }
    fn activate_delayed_compression(&mut self) -> Result<(), Error> {
        if self.delayed_compression {
            self.compression_active = true;
        }
        Ok(())
    }
}

fn session() -> Session<StubTransport> {
    let _ = env_logger::try_init();
    let config = Config {
        username: "alice".to_string(),
        identities: Vec::new(),
        timeout: Some(Duration::from_secs(5)),
    };
    Session::new(StubTransport::new(), config)
}

// Server-side packet builders.

fn failure(methods: &str, partial: bool) -> Vec<u8> {
    let mut b = CryptoVec::new();
    b.push(msg::USERAUTH_FAILURE);
    b.extend_ssh_string(methods.as_bytes());
    b.push(partial as u8);
    b[..].to_vec()
}

fn success() -> Vec<u8> {
    vec![msg::USERAUTH_SUCCESS]
}

fn banner(text: &str, lang: &str) -> Vec<u8> {
    let mut b = CryptoVec::new();
    b.push(msg::USERAUTH_BANNER);
    b.extend_ssh_string(text.as_bytes());
    b.extend_ssh_string(lang.as_bytes());
    b[..].to_vec()
}

fn pk_ok(algo: &str, blob: &[u8]) -> Vec<u8> {
    let mut b = CryptoVec::new();
    b.push(msg::USERAUTH_PK_OK);
    b.extend_ssh_string(algo.as_bytes());
    b.extend_ssh_string(blob);
    b[..].to_vec()
}

fn info_request(name: &str, instruction: &str, prompts: &[(&str, bool)]) -> Vec<u8> {
    let mut b = CryptoVec::new();
    b.push(msg::USERAUTH_INFO_REQUEST);
    b.extend_ssh_string(name.as_bytes());
    b.extend_ssh_string(instruction.as_bytes());
    b.extend_ssh_string(b"");
    b.push_u32_be(prompts.len() as u32);
    for &(text, echo) in prompts {
        b.extend_ssh_string(text.as_bytes());
        b.push(echo as u8);
    }
    b[..].to_vec()
}

// Key material stubs. The "signature" is a deterministic hash so tests
// can recompute what a correct signer must have produced.

fn fake_sig(data: &[u8]) -> Vec<u8> {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in data {
        h ^= byte as u64;
        h = h.wrapping_mul(0x100_0000_01b3);
    }
    h.to_be_bytes().to_vec()
}

#[derive(Debug, Clone)]
struct TestKey {
    algo: &'static str,
    blob: Vec<u8>,
}

impl PubKey for TestKey {
    fn name(&self) -> &str {
        self.algo
    }
    fn push_to(&self, buffer: &mut CryptoVec) {
        buffer.extend_ssh_string(&self.blob)
    }
}

#[derive(Debug, Clone)]
struct TestKeyPair {
    public: TestKey,
}

impl PubKey for TestKeyPair {
    fn name(&self) -> &str {
        self.public.name()
    }
    fn push_to(&self, buffer: &mut CryptoVec) {
        self.public.push_to(buffer)
    }
}

impl PrivateKey for TestKeyPair {
    fn add_self_signature(&self, buffer: &mut CryptoVec) -> Result<(), anyhow::Error> {
        let sig = fake_sig(&buffer[..]);
        let mut s = CryptoVec::new();
        s.extend_ssh_string(self.public.algo.as_bytes());
        s.extend_ssh_string(&sig);
        buffer.extend_ssh_string(&s[..]);
        Ok(())
    }
}

fn rsa_key() -> TestKeyPair {
    TestKeyPair {
        public: TestKey {
            algo: "ssh-rsa",
            blob: b"rsa-public-blob".to_vec(),
        },
    }
}

struct StubAgent {
    idents: Vec<AgentIdentity>,
    sign_calls: usize,
}

impl Agent for StubAgent {
    fn identities(&mut self) -> Result<Vec<AgentIdentity>, anyhow::Error> {
        Ok(self.idents.clone())
    }
    fn sign_request(
        &mut self,
        key: &AgentIdentity,
        mut to_sign: CryptoVec,
    ) -> Result<CryptoVec, anyhow::Error> {
        self.sign_calls += 1;
        let sig = fake_sig(&to_sign[..]);
        let mut s = CryptoVec::new();
        s.extend_ssh_string(key.algo.as_bytes());
        s.extend_ssh_string(&sig);
        to_sign.extend_ssh_string(&s[..]);
        Ok(to_sign)
    }
}

/// An in-memory identity directory: private keys by path, optionally
/// passphrase-protected, and a record of the `.pub` files written.
struct StubStore {
    private: HashMap<PathBuf, (TestKeyPair, Option<String>)>,
    public: Mutex<HashMap<PathBuf, TestKey>>,
}

impl StubStore {
    fn new() -> Self {
        StubStore {
            private: HashMap::new(),
            public: Mutex::new(HashMap::new()),
        }
    }
}

impl KeyStore for StubStore {
    type Public = TestKey;
    type Private = TestKeyPair;

    fn import_public(&self, path: &Path) -> Result<Option<TestKey>, anyhow::Error> {
        Ok(self.public.lock().unwrap().get(path).cloned())
    }

    fn import_private(
        &self,
        path: &Path,
        passphrase: Option<&str>,
        prompt: Option<&mut dyn Prompt>,
    ) -> Result<TestKeyPair, anyhow::Error> {
        let (pair, required) = self
            .private
            .get(path)
            .ok_or_else(|| anyhow::anyhow!("no such identity: {:?}", path))?;
        match required {
            None => Ok(pair.clone()),
            Some(required) => {
                if passphrase == Some(required.as_str()) {
                    return Ok(pair.clone());
                }
                if let Some(prompt) = prompt {
                    let answer = prompt.prompt("Passphrase:", false)?;
                    if &answer == required {
                        return Ok(pair.clone());
                    }
                }
                Err(anyhow::anyhow!("bad passphrase for {:?}", path))
            }
        }
    }

    fn write_public(&self, key: &TestKeyPair, path: &Path) -> Result<(), anyhow::Error> {
        self.public
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), key.public.clone());
        Ok(())
    }
}

// Expected client packets.

fn request_prefix(user: &str, method: &str) -> CryptoVec {
    let mut b = CryptoVec::new();
    b.push(msg::USERAUTH_REQUEST);
    b.extend_ssh_string(user.as_bytes());
    b.extend_ssh_string(b"ssh-connection");
    b.extend_ssh_string(method.as_bytes());
    b
}

#[test]
fn none_probe_on_password_only_server() {
    let mut session = session();
    session.transport_mut().queue(failure("password", false));

    let status = session.userauth_none(Some("alice")).unwrap();
    assert_eq!(status, AuthStatus::Denied);
    assert_eq!(session.userauth_list(), MethodSet::PASSWORD);
    assert_eq!(
        session.transport().service_requests,
        vec!["ssh-userauth".to_string()]
    );

    let expected = request_prefix("alice", "none");
    assert_eq!(session.transport().sent[0], &expected[..]);
}

#[test]
fn password_success_enables_delayed_compression() {
    let mut session = session();
    session.transport_mut().delayed_compression = true;
    session.transport_mut().queue(failure("password", false));
    session.transport_mut().queue(success());

    assert_eq!(session.userauth_none(None).unwrap(), AuthStatus::Denied);
    let status = session.userauth_password(None, "hunter2").unwrap();
    assert_eq!(status, AuthStatus::Success);
    assert!(session.is_authenticated());
    assert!(session.transport().compression_active);

    let mut expected = request_prefix("alice", "password");
    expected.push(0);
    expected.extend_ssh_string(b"hunter2");
    assert_eq!(session.transport().sent[1], &expected[..]);
}

#[test]
fn password_denied_is_not_fatal() {
    let mut session = session();
    session
        .transport_mut()
        .queue(failure("password,publickey", false));
    let status = session.userauth_password(None, "wrong").unwrap();
    assert_eq!(status, AuthStatus::Denied);
    assert!(!session.is_authenticated());
    assert_eq!(
        session.userauth_list(),
        MethodSet::PASSWORD | MethodSet::PUBLICKEY
    );
}

#[test]
fn unknown_method_names_are_ignored() {
    let mut session = session();
    session
        .transport_mut()
        .queue(failure("gssapi-with-mic,password,none", false));
    let status = session.userauth_none(None).unwrap();
    assert_eq!(status, AuthStatus::Denied);
    // Only the recognized subset of the server's list survives.
    assert_eq!(session.userauth_list(), MethodSet::PASSWORD);
}

#[test]
fn partial_success_keeps_remaining_methods() {
    let mut session = session();
    session.transport_mut().queue(failure("publickey", true));
    let status = session.userauth_password(None, "hunter2").unwrap();
    assert_eq!(status, AuthStatus::Partial);
    assert_eq!(session.userauth_list(), MethodSet::PUBLICKEY);
}

#[test]
fn banner_is_kept_for_the_caller() {
    let mut session = session();
    session
        .transport_mut()
        .queue(banner("welcome to wonderland", "en"));
    session.transport_mut().queue(failure("password", false));

    assert_eq!(session.userauth_none(None).unwrap(), AuthStatus::Denied);
    assert_eq!(session.banner(), Some("welcome to wonderland"));
}

#[test]
fn publickey_offer_accepted_then_signature_denied() {
    let key = rsa_key();
    let mut session = session();
    session
        .transport_mut()
        .queue(pk_ok("ssh-rsa", &key.public.blob));

    let status = session
        .userauth_try_publickey(Some("alice"), &key.public)
        .unwrap();
    assert_eq!(status, AuthStatus::Success);

    let mut expected = request_prefix("alice", "publickey");
    expected.push(0);
    expected.extend_ssh_string(b"ssh-rsa");
    expected.extend_ssh_string(&key.public.blob);
    assert_eq!(session.transport().sent[0], &expected[..]);

    session
        .transport_mut()
        .queue(failure("publickey,password", false));
    let status = session.userauth_publickey(Some("alice"), &key).unwrap();
    assert_eq!(status, AuthStatus::Denied);
    assert_eq!(
        session.userauth_list(),
        MethodSet::PUBLICKEY | MethodSet::PASSWORD
    );

    // The second request must carry the signature flag and a signature
    // bound to the session identifier.
    let pkt = session.transport().sent[1].clone();
    let mut r = pkt[..].reader(0);
    assert_eq!(r.read_byte().unwrap(), msg::USERAUTH_REQUEST);
    assert_eq!(r.read_string().unwrap(), b"alice");
    assert_eq!(r.read_string().unwrap(), b"ssh-connection");
    assert_eq!(r.read_string().unwrap(), b"publickey");
    assert_eq!(r.read_byte().unwrap(), 1);
    assert_eq!(r.read_string().unwrap(), b"ssh-rsa");
    assert_eq!(r.read_string().unwrap(), &key.public.blob[..]);
    let sig_offset = r.position;
    let sig_blob = r.read_string().unwrap();

    let mut to_sign = CryptoVec::new();
    to_sign.extend_ssh_string(SESSION_ID);
    to_sign.extend(&pkt[..sig_offset]);
    let mut s = sig_blob.reader(0);
    assert_eq!(s.read_string().unwrap(), b"ssh-rsa");
    assert_eq!(s.read_string().unwrap(), &fake_sig(&to_sign[..])[..]);
}

#[test]
fn keyboard_interactive_two_prompts() {
    let mut session = session();
    session.transport_mut().queue(info_request(
        "PAM",
        "Please authenticate",
        &[("Password:", false), ("OTP:", true)],
    ));

    let status = session.userauth_kbdint(None, None).unwrap();
    assert_eq!(status, AuthStatus::Info);

    let mut expected = request_prefix("alice", "keyboard-interactive");
    expected.extend_ssh_string(b"");
    expected.extend_ssh_string(b"");
    assert_eq!(session.transport().sent[0], &expected[..]);

    assert_eq!(session.userauth_kbdint_name(), Some("PAM"));
    assert_eq!(
        session.userauth_kbdint_instruction(),
        Some("Please authenticate")
    );
    assert_eq!(session.userauth_kbdint_nprompts(), 2);
    assert_eq!(
        session.userauth_kbdint_prompt(0),
        Some(("Password:", false))
    );
    assert_eq!(session.userauth_kbdint_prompt(1), Some(("OTP:", true)));
    assert_eq!(session.userauth_kbdint_prompt(2), None);

    // Answer index bounds are strict.
    assert!(session.userauth_kbdint_set_answer(2, "x").is_err());
    session.userauth_kbdint_set_answer(0, "p").unwrap();
    session.userauth_kbdint_set_answer(1, "123456").unwrap();

    session.transport_mut().queue(success());
    let status = session.userauth_kbdint(None, None).unwrap();
    assert_eq!(status, AuthStatus::Success);
    assert!(session.is_authenticated());

    let mut expected = CryptoVec::new();
    expected.push(msg::USERAUTH_INFO_RESPONSE);
    expected.push_u32_be(2);
    expected.extend_ssh_string(b"p");
    expected.extend_ssh_string(b"123456");
    assert_eq!(session.transport().sent[1], &expected[..]);

    // The scratch is consumed by the send.
    assert_eq!(session.userauth_kbdint_nprompts(), 0);
}

#[test]
fn keyboard_interactive_empty_challenge_is_fatal() {
    let mut session = session();
    session
        .transport_mut()
        .queue(info_request("", "", &[]));
    match session.userauth_kbdint(None, None) {
        Err(Error::PromptCount) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(session.userauth_kbdint_nprompts(), 0);
    // The session is defunct after a fatal protocol error.
    match session.userauth_none(None) {
        Err(Error::Defunct) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn keyboard_interactive_prompt_flood_is_fatal() {
    let prompts: Vec<(&str, bool)> = (0..33).map(|_| ("q", true)).collect();
    let mut session = session();
    session
        .transport_mut()
        .queue(info_request("flood", "", &prompts));
    match session.userauth_kbdint(None, None) {
        Err(Error::PromptCount) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn nonblocking_call_resumes_the_same_driver() {
    let mut session = session();
    session.transport_mut().block_reads = 1;
    session.transport_mut().queue(success());

    let status = session.userauth_password(None, "hunter2").unwrap();
    assert_eq!(status, AuthStatus::Again);
    let sent_before = session.transport().sent.len();

    // A different driver while the password call is pending is a fatal
    // re-entrancy error, and nothing goes out on the wire.
    match session.userauth_none(None) {
        Err(Error::PendingCallMismatch) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(session.transport().sent.len(), sent_before);

    // Re-entering the same driver picks the call back up.
    let status = session.userauth_password(None, "hunter2").unwrap();
    assert_eq!(status, AuthStatus::Success);
    assert!(session.is_authenticated());
    // No second request was emitted for the resumption.
    assert_eq!(session.transport().sent.len(), sent_before);
}

#[test]
fn agent_cascade_skips_rejected_identities() {
    let first = AgentIdentity {
        algo: "ssh-ed25519".to_string(),
        blob: b"agent-key-one".to_vec(),
        comment: "one".to_string(),
    };
    let second = AgentIdentity {
        algo: "ssh-ed25519".to_string(),
        blob: b"agent-key-two".to_vec(),
        comment: "two".to_string(),
    };
    let mut agent = StubAgent {
        idents: vec![first, second.clone()],
        sign_calls: 0,
    };

    let mut session = session();
    // First offer denied, second accepted, signature accepted.
    session.transport_mut().queue(failure("publickey", false));
    session.transport_mut().queue(pk_ok("ssh-ed25519", &second.blob));
    session.transport_mut().queue(success());

    let status = session.userauth_agent(None, &mut agent).unwrap();
    assert_eq!(status, AuthStatus::Success);
    assert_eq!(agent.sign_calls, 1);
    assert!(session.is_authenticated());

    // Offer, offer, signed request.
    assert_eq!(session.transport().sent.len(), 3);
    let pkt = session.transport().sent[2].clone();
    let mut r = pkt[..].reader(0);
    assert_eq!(r.read_byte().unwrap(), msg::USERAUTH_REQUEST);
    assert_eq!(r.read_string().unwrap(), b"alice");
    assert_eq!(r.read_string().unwrap(), b"ssh-connection");
    assert_eq!(r.read_string().unwrap(), b"publickey");
    assert_eq!(r.read_byte().unwrap(), 1);
    assert_eq!(r.read_string().unwrap(), b"ssh-ed25519");
    assert_eq!(r.read_string().unwrap(), &second.blob[..]);
    assert!(r.read_string().is_ok());
}

#[test]
fn auto_cascade_imports_encrypted_key_and_writes_pub() {
    let pair = rsa_key();
    let mut store = StubStore::new();
    store.private.insert(
        PathBuf::from("/k/id_rsa"),
        (pair.clone(), Some("pw".to_string())),
    );
    let mut agent = StubAgent {
        idents: Vec::new(),
        sign_calls: 0,
    };

    let _ = env_logger::try_init();
    let config = Config {
        username: "alice".to_string(),
        identities: vec![PathBuf::from("/k/id_rsa")],
        timeout: Some(Duration::from_secs(5)),
    };
    let mut session = Session::new(StubTransport::new(), config);
    session
        .transport_mut()
        .queue(pk_ok("ssh-rsa", &pair.public.blob));
    session.transport_mut().queue(success());

    let status = session
        .userauth_publickey_auto(None, Some("pw"), &store, Some(&mut agent), None)
        .unwrap();
    assert_eq!(status, AuthStatus::Success);
    assert!(session.is_authenticated());

    // The missing .pub was derived and persisted.
    assert!(store
        .public
        .lock()
        .unwrap()
        .contains_key(Path::new("/k/id_rsa.pub")));

    // One offer (flag 0) and one signed request (flag 1).
    assert_eq!(session.transport().sent.len(), 2);
    let mut r = session.transport().sent[0][..].reader(0);
    assert_eq!(r.read_byte().unwrap(), msg::USERAUTH_REQUEST);
    r.read_string().unwrap();
    r.read_string().unwrap();
    assert_eq!(r.read_string().unwrap(), b"publickey");
    assert_eq!(r.read_byte().unwrap(), 0);
    let mut r = session.transport().sent[1][..].reader(0);
    assert_eq!(r.read_byte().unwrap(), msg::USERAUTH_REQUEST);
    r.read_string().unwrap();
    r.read_string().unwrap();
    assert_eq!(r.read_string().unwrap(), b"publickey");
    assert_eq!(r.read_byte().unwrap(), 1);
}

#[test]
fn auto_cascade_prompts_for_the_passphrase() {
    let pair = rsa_key();
    let mut store = StubStore::new();
    store.private.insert(
        PathBuf::from("/k/id_rsa"),
        (pair.clone(), Some("sekrit".to_string())),
    );

    let _ = env_logger::try_init();
    let config = Config {
        username: "alice".to_string(),
        identities: vec![PathBuf::from("/k/id_rsa")],
        timeout: Some(Duration::from_secs(5)),
    };
    let mut session = Session::new(StubTransport::new(), config);
    session
        .transport_mut()
        .queue(pk_ok("ssh-rsa", &pair.public.blob));
    session.transport_mut().queue(success());

    let mut asked = Vec::new();
    let mut prompt = |text: &str, echo: bool| -> Result<String, anyhow::Error> {
        asked.push((text.to_string(), echo));
        Ok("sekrit".to_string())
    };
    let status = session
        .userauth_publickey_auto(None, None, &store, None, Some(&mut prompt as &mut dyn Prompt))
        .unwrap();
    assert_eq!(status, AuthStatus::Success);
    assert_eq!(asked, vec![("Passphrase:".to_string(), false)]);
}

#[test]
fn auto_cascade_exhaustion_is_denied() {
    let store = StubStore::new();
    let _ = env_logger::try_init();
    let config = Config {
        username: "alice".to_string(),
        identities: vec![PathBuf::from("/k/missing")],
        timeout: Some(Duration::from_secs(5)),
    };
    let mut session = Session::new(StubTransport::new(), config);
    let status = session
        .userauth_publickey_auto(None, None, &store, None, None)
        .unwrap();
    assert_eq!(status, AuthStatus::Denied);
    // Nothing importable, nothing sent.
    assert!(session.transport().sent.is_empty());
}

#[test]
fn malformed_failure_packet_poisons_the_session() {
    let mut session = session();
    // Truncated USERAUTH_FAILURE: the method list length points past
    // the end of the packet.
    let mut b = CryptoVec::new();
    b.push(msg::USERAUTH_FAILURE);
    b.push_u32_be(1000);
    session.transport_mut().queue(b[..].to_vec());

    match session.userauth_none(None) {
        Err(Error::IndexOutOfBounds) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    match session.userauth_password(None, "hunter2") {
        Err(Error::Defunct) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn multi_round_keyboard_interactive() {
    let mut session = session();
    session
        .transport_mut()
        .queue(info_request("round one", "", &[("Password:", false)]));

    assert_eq!(session.userauth_kbdint(None, None).unwrap(), AuthStatus::Info);
    session.userauth_kbdint_set_answer(0, "p").unwrap();

    // The answers trigger a second challenge before the verdict.
    session
        .transport_mut()
        .queue(info_request("round two", "", &[("OTP:", true)]));
    assert_eq!(session.userauth_kbdint(None, None).unwrap(), AuthStatus::Info);
    assert_eq!(session.userauth_kbdint_name(), Some("round two"));
    session.userauth_kbdint_set_answer(0, "123456").unwrap();

    session.transport_mut().queue(success());
    assert_eq!(
        session.userauth_kbdint(None, None).unwrap(),
        AuthStatus::Success
    );
}

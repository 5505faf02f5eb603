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

//! The authentication drivers.
//!
//! Every driver follows the same skeleton: resume if its own request is
//! already pending, request the `ssh-userauth` service, emit one
//! `USERAUTH_REQUEST`, mark itself pending and wait for the server's
//! verdict. The agent and automatic drivers are cascades over the simple
//! drivers, with a resume cursor so that `Again` re-enters mid-cascade.

use std::path::{Path, PathBuf};

use cryptovec::CryptoVec;

use super::Session;
use crate::agent::{Agent, AgentIdentity};
use crate::auth::{AgentAuthState, AuthState, AuthStatus, AutoAuthState, PendingCall};
use crate::encoding::Encoding;
use crate::key::{KeyStore, PrivateKey, Prompt, PubKey};
use crate::msg;
use crate::transport::Transport;
use crate::Error;

impl<T: Transport> Session<T> {
    /// Probe the server with the `none` method. Servers almost always
    /// deny it and list their acceptable methods, readable afterwards
    /// through [`Session::userauth_list`].
    pub fn userauth_none(&mut self, user: Option<&str>) -> Result<AuthStatus, Error> {
        if self.begin_request(PendingCall::AuthNone)? {
            let r = self.wait_auth_response();
            return self.finish_request(r);
        }
        if !self.transport.request_service("ssh-userauth")? {
            return Ok(AuthStatus::Again);
        }
        let user = self.auth_user(user);
        let mut pkt = CryptoVec::new();
        pkt.push(msg::USERAUTH_REQUEST);
        pkt.extend_ssh_string(user.as_bytes());
        pkt.extend_ssh_string(b"ssh-connection");
        pkt.extend_ssh_string(b"none");
        self.send_request(pkt, PendingCall::AuthNone, AuthState::None)
    }

    /// Authenticate with a plaintext password. The request buffer is
    /// wiped once the packet has been handed to the transport.
    pub fn userauth_password(
        &mut self,
        user: Option<&str>,
        password: &str,
    ) -> Result<AuthStatus, Error> {
        if self.begin_request(PendingCall::Password)? {
            let r = self.wait_auth_response();
            return self.finish_request(r);
        }
        if !self.transport.request_service("ssh-userauth")? {
            return Ok(AuthStatus::Again);
        }
        let user = self.auth_user(user);
        let mut pkt = CryptoVec::new();
        pkt.push(msg::USERAUTH_REQUEST);
        pkt.extend_ssh_string(user.as_bytes());
        pkt.extend_ssh_string(b"ssh-connection");
        pkt.extend_ssh_string(b"password");
        pkt.push(0);
        pkt.extend_ssh_string(password.as_bytes());
        self.send_request(pkt, PendingCall::Password, AuthState::None)
    }

    /// Offer a public key without signing anything. `Success` means the
    /// server would accept a signature from this key, which
    /// [`Session::userauth_publickey`] can then produce.
    pub fn userauth_try_publickey<K: PubKey + ?Sized>(
        &mut self,
        user: Option<&str>,
        key: &K,
    ) -> Result<AuthStatus, Error> {
        if self.begin_request(PendingCall::TryPublicKey)? {
            let r = self.wait_auth_response();
            return self.finish_request(r);
        }
        if !self.transport.request_service("ssh-userauth")? {
            return Ok(AuthStatus::Again);
        }
        let user = self.auth_user(user);
        let mut pkt = CryptoVec::new();
        pkt.push(msg::USERAUTH_REQUEST);
        pkt.extend_ssh_string(user.as_bytes());
        pkt.extend_ssh_string(b"ssh-connection");
        pkt.extend_ssh_string(b"publickey");
        pkt.push(0); // This is a probe
        pkt.extend_ssh_string(key.name().as_bytes());
        key.push_to(&mut pkt);
        self.send_request(pkt, PendingCall::TryPublicKey, AuthState::None)
    }

    /// Authenticate with a private key. The signature is bound to the
    /// transport's session identifier, per RFC 4252 §7.
    pub fn userauth_publickey<K: PrivateKey + ?Sized>(
        &mut self,
        user: Option<&str>,
        key: &K,
    ) -> Result<AuthStatus, Error> {
        if self.begin_request(PendingCall::PublicKey)? {
            let r = self.wait_auth_response();
            return self.finish_request(r);
        }
        if !self.transport.request_service("ssh-userauth")? {
            return Ok(AuthStatus::Again);
        }
        let user = self.auth_user(user);
        let i0 = make_to_sign(
            self.transport.session_id(),
            &user,
            key,
            &mut self.buffer,
        );
        // Extend with self-signature.
        if let Err(e) = key.add_self_signature(&mut self.buffer) {
            self.buffer.clear();
            return Err(Error::Keys(e));
        }
        self.auth_state = AuthState::None;
        self.pending = PendingCall::PublicKey;
        let r = match self.transport.send(&self.buffer[i0..]) {
            Ok(()) => self.wait_auth_response(),
            Err(e) => Err(e),
        };
        self.buffer.clear();
        self.finish_request(r)
    }

    /// Try every identity held by the agent: offer it, and if the server
    /// accepts the offer, have the agent sign. The private keys never
    /// leave the agent.
    pub fn userauth_agent(
        &mut self,
        user: Option<&str>,
        agent: &mut dyn Agent,
    ) -> Result<AuthStatus, Error> {
        if self.defunct {
            return Err(Error::Defunct);
        }
        // A live cursor means our own sub-request is the pending one.
        if self.agent_state.is_none() && self.pending != PendingCall::None {
            return Err(Error::PendingCallMismatch);
        }
        let result = self.userauth_agent_step(user, agent);
        match &result {
            Ok(AuthStatus::Again) => {}
            Ok(_) => self.agent_state = None,
            Err(_) => {
                // An aborted cascade must not leave a resumable marker.
                self.agent_state = None;
                self.pending = PendingCall::None;
            }
        }
        result
    }

    fn userauth_agent_step(
        &mut self,
        user: Option<&str>,
        agent: &mut dyn Agent,
    ) -> Result<AuthStatus, Error> {
        let AgentAuthState {
            mut index,
            mut signing,
        } = self.agent_state.unwrap_or(AgentAuthState {
            index: 0,
            signing: false,
        });
        let idents = agent.identities().map_err(Error::Agent)?;
        let user = self.auth_user(user);
        while index < idents.len() {
            let key = &idents[index];
            if !signing {
                let status = if self.pending == PendingCall::TryPublicKey {
                    let r = self.wait_auth_response();
                    self.finish_request(r)?
                } else {
                    debug!("agent: offering identity {:?}", key.comment);
                    self.userauth_try_publickey(Some(user.as_str()), key)?
                };
                match status {
                    AuthStatus::Again => {
                        self.agent_state = Some(AgentAuthState {
                            index,
                            signing: false,
                        });
                        return Ok(AuthStatus::Again);
                    }
                    AuthStatus::Success => signing = true,
                    status => {
                        debug!("agent: identity {:?} not acceptable: {:?}", key.comment, status);
                        index += 1;
                        continue;
                    }
                }
            }
            let status = if self.pending == PendingCall::Agent {
                let r = self.wait_auth_response();
                self.finish_request(r)?
            } else {
                self.userauth_agent_sign(&user, key, agent)?
            };
            match status {
                AuthStatus::Again => {
                    self.agent_state = Some(AgentAuthState {
                        index,
                        signing: true,
                    });
                    return Ok(AuthStatus::Again);
                }
                AuthStatus::Success => return Ok(AuthStatus::Success),
                status => {
                    debug!("agent: signature with {:?} rejected: {:?}", key.comment, status);
                    index += 1;
                    signing = false;
                }
            }
        }
        Ok(AuthStatus::Denied)
    }

    fn userauth_agent_sign(
        &mut self,
        user: &str,
        key: &AgentIdentity,
        agent: &mut dyn Agent,
    ) -> Result<AuthStatus, Error> {
        let i0 = make_to_sign(self.transport.session_id(), user, key, &mut self.buffer);
        let unsigned_len = self.buffer.len();
        let to_sign = std::mem::replace(&mut self.buffer, CryptoVec::new());
        let signed = agent.sign_request(key, to_sign).map_err(Error::Agent)?;
        if signed.len() <= unsigned_len {
            return Err(Error::Agent(anyhow::anyhow!(
                "agent did not return a signature"
            )));
        }
        self.auth_state = AuthState::None;
        self.pending = PendingCall::Agent;
        let r = match self.transport.send(&signed[i0..]) {
            Ok(()) => self.wait_auth_response(),
            Err(e) => Err(e),
        };
        self.finish_request(r)
    }

    /// The automatic public-key cascade: agent first when one is given,
    /// then every identity file of the configuration. Missing `.pub`
    /// files are regenerated from the private key, prompting through
    /// `prompt` (or using `passphrase`) when the key is encrypted.
    pub fn userauth_publickey_auto<S: KeyStore>(
        &mut self,
        user: Option<&str>,
        passphrase: Option<&str>,
        store: &S,
        agent: Option<&mut dyn Agent>,
        prompt: Option<&mut dyn Prompt>,
    ) -> Result<AuthStatus, Error> {
        if self.defunct {
            return Err(Error::Defunct);
        }
        if self.auto_state.is_none() && self.pending != PendingCall::None {
            return Err(Error::PendingCallMismatch);
        }
        if self.auto_state.is_none() {
            self.auto_state = Some(if agent.is_some() {
                AutoAuthState::Agent
            } else {
                AutoAuthState::File {
                    index: 0,
                    signing: false,
                }
            });
        }
        let result = self.userauth_auto_step(user, passphrase, store, agent, prompt);
        match &result {
            Ok(AuthStatus::Again) => {}
            Ok(_) => self.auto_state = None,
            Err(_) => {
                self.auto_state = None;
                self.pending = PendingCall::None;
            }
        }
        result
    }

    fn userauth_auto_step<S: KeyStore>(
        &mut self,
        user: Option<&str>,
        passphrase: Option<&str>,
        store: &S,
        agent: Option<&mut dyn Agent>,
        prompt: Option<&mut dyn Prompt>,
    ) -> Result<AuthStatus, Error> {
        // `prompt` is reborrowed at two call sites inside the loop below;
        // NLL cannot prove the borrows are disjoint across loop back-edges,
        // so it is reborrowed through a raw pointer instead. Only one
        // reborrow is ever live at a time.
        let prompt_ptr: Option<*mut dyn Prompt> = prompt.map(|p| p as *mut dyn Prompt);
        macro_rules! reborrow_prompt {
            () => {
                prompt_ptr.map(|p| unsafe { &mut *p })
            };
        }
        let mut state = match self.auto_state {
            Some(state) => state,
            None => unreachable!(),
        };
        if let AutoAuthState::Agent = state {
            if let Some(agent) = agent {
                match self.userauth_agent(user, agent)? {
                    AuthStatus::Success => return Ok(AuthStatus::Success),
                    AuthStatus::Again => {
                        self.auto_state = Some(AutoAuthState::Agent);
                        return Ok(AuthStatus::Again);
                    }
                    status => debug!("agent cascade did not authenticate: {:?}", status),
                }
            }
            state = AutoAuthState::File {
                index: 0,
                signing: false,
            };
        }
        let (mut index, mut signing) = match state {
            AutoAuthState::File { index, signing } => (index, signing),
            AutoAuthState::Agent => unreachable!(),
        };
        let paths = self.config.identities.clone();
        let user = self.auth_user(user);
        while index < paths.len() {
            let path = &paths[index];
            let mut loaded: Option<S::Private> = None;
            if !signing {
                let status = if self.pending == PendingCall::TryPublicKey {
                    let r = self.wait_auth_response();
                    self.finish_request(r)?
                } else {
                    let pub_path = public_key_path(path);
                    match store.import_public(&pub_path) {
                        Ok(Some(public)) => {
                            self.userauth_try_publickey(Some(user.as_str()), &public)?
                        }
                        Ok(None) => {
                            // No .pub next to the private key: load the
                            // private key and regenerate it, best effort.
                            match store.import_private(path, passphrase, reborrow_prompt!()) {
                                Ok(pair) => {
                                    if let Err(e) = store.write_public(&pair, &pub_path) {
                                        warn!("could not write {:?}: {}", pub_path, e);
                                    }
                                    let status =
                                        self.userauth_try_publickey(Some(user.as_str()), &pair)?;
                                    loaded = Some(pair);
                                    status
                                }
                                Err(e) => {
                                    warn!("could not import private key {:?}: {}", path, e);
                                    index += 1;
                                    continue;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("could not import public key {:?}: {}", pub_path, e);
                            index += 1;
                            continue;
                        }
                    }
                };
                match status {
                    AuthStatus::Again => {
                        self.auto_state = Some(AutoAuthState::File {
                            index,
                            signing: false,
                        });
                        return Ok(AuthStatus::Again);
                    }
                    AuthStatus::Success => signing = true,
                    status => {
                        debug!("offer of {:?} not accepted: {:?}", path, status);
                        index += 1;
                        continue;
                    }
                }
            }
            let status = if self.pending == PendingCall::PublicKey {
                let r = self.wait_auth_response();
                self.finish_request(r)?
            } else {
                let pair = match loaded.take() {
                    Some(pair) => pair,
                    // Only the public half was on disk; read the private
                    // key now that the server accepted the offer.
                    None => match store.import_private(path, passphrase, reborrow_prompt!()) {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("could not import private key {:?}: {}", path, e);
                            index += 1;
                            signing = false;
                            continue;
                        }
                    },
                };
                self.userauth_publickey(Some(user.as_str()), &pair)?
            };
            match status {
                AuthStatus::Success => return Ok(AuthStatus::Success),
                AuthStatus::Again => {
                    self.auto_state = Some(AutoAuthState::File {
                        index,
                        signing: true,
                    });
                    return Ok(AuthStatus::Again);
                }
                status => {
                    debug!("signature with {:?} rejected: {:?}", path, status);
                    index += 1;
                    signing = false;
                }
            }
        }
        Ok(AuthStatus::Denied)
    }

    /// Start or continue a keyboard-interactive exchange. Without a live
    /// challenge this sends the initial request; with one it sends the
    /// answers set through [`Session::userauth_kbdint_set_answer`] and
    /// destroys the challenge scratch.
    pub fn userauth_kbdint(
        &mut self,
        user: Option<&str>,
        submethods: Option<&str>,
    ) -> Result<AuthStatus, Error> {
        if self.begin_request(PendingCall::Kbdint)? {
            let r = self.wait_auth_response();
            return self.finish_request(r);
        }
        if let Some(kbdint) = self.kbdint.take() {
            let mut pkt = CryptoVec::new();
            pkt.push(msg::USERAUTH_INFO_RESPONSE);
            kbdint.push_responses(&mut pkt);
            // Zeroizes the prompts and answers.
            drop(kbdint);
            return self.send_request(pkt, PendingCall::Kbdint, AuthState::KbdintSent);
        }
        if !self.transport.request_service("ssh-userauth")? {
            return Ok(AuthStatus::Again);
        }
        let user = self.auth_user(user);
        let mut pkt = CryptoVec::new();
        pkt.push(msg::USERAUTH_REQUEST);
        pkt.extend_ssh_string(user.as_bytes());
        pkt.extend_ssh_string(b"ssh-connection");
        pkt.extend_ssh_string(b"keyboard-interactive");
        pkt.extend_ssh_string(b""); // language tag, deprecated
        pkt.extend_ssh_string(submethods.unwrap_or("").as_bytes());
        self.send_request(pkt, PendingCall::Kbdint, AuthState::KbdintSent)
    }

    /// Common entry check: `Ok(true)` resumes a call of the same driver
    /// that previously returned `Again`, `Ok(false)` starts fresh, and a
    /// different pending driver is a fatal re-entrancy error that leaves
    /// the pending marker untouched.
    fn begin_request(&mut self, marker: PendingCall) -> Result<bool, Error> {
        if self.defunct {
            return Err(Error::Defunct);
        }
        if self.pending == marker {
            return Ok(true);
        }
        if self.pending != PendingCall::None {
            return Err(Error::PendingCallMismatch);
        }
        Ok(false)
    }

    /// Clear the pending marker on every terminal outcome, success or
    /// error; only `Again` keeps it for the resuming call.
    fn finish_request(
        &mut self,
        result: Result<AuthStatus, Error>,
    ) -> Result<AuthStatus, Error> {
        match &result {
            Ok(AuthStatus::Again) => {}
            _ => self.pending = PendingCall::None,
        }
        result
    }

    fn send_request(
        &mut self,
        pkt: CryptoVec,
        marker: PendingCall,
        state: AuthState,
    ) -> Result<AuthStatus, Error> {
        self.auth_state = state;
        self.pending = marker;
        let r = match self.transport.send(&pkt) {
            Ok(()) => self.wait_auth_response(),
            Err(e) => Err(e),
        };
        self.finish_request(r)
    }

    fn auth_user(&self, user: Option<&str>) -> String {
        match user {
            Some(user) => user.to_string(),
            None => self.config.username.clone(),
        }
    }
}

/// Fill `buffer` with the signed part of a public-key request: the
/// session identifier as an SSH string, then the `USERAUTH_REQUEST` from
/// the message byte up to and including the key blob, with the
/// signature-present flag set. Returns the offset where the packet to
/// send starts.
fn make_to_sign<K: PubKey + ?Sized>(
    session_id: &[u8],
    user: &str,
    key: &K,
    buffer: &mut CryptoVec,
) -> usize {
    buffer.clear();
    buffer.extend_ssh_string(session_id);

    let i0 = buffer.len();
    buffer.push(msg::USERAUTH_REQUEST);
    buffer.extend_ssh_string(user.as_bytes());
    buffer.extend_ssh_string(b"ssh-connection");
    buffer.extend_ssh_string(b"publickey");
    buffer.push(1);
    buffer.extend_ssh_string(key.name().as_bytes());
    key.push_to(buffer);
    i0
}

fn public_key_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".pub");
    PathBuf::from(os)
}

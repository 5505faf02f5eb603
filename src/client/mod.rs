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

//! The client session: configuration, authentication state, and the
//! public driver API.
//!
//! A [`Session`] wraps a [`Transport`] that has finished its first key
//! exchange. Each `userauth_*` driver sends one `USERAUTH_REQUEST` (or
//! `INFO_RESPONSE`) and reads packets until the server settles the
//! attempt. On a non-blocking transport a driver can return
//! [`AuthStatus::Again`]; re-invoking the same driver resumes the
//! attempt, re-invoking any other driver is a fatal error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cryptovec::CryptoVec;

use crate::auth::{AgentAuthState, AuthState, AutoAuthState, MethodSet, PendingCall};
use crate::kbdint::Kbdint;
use crate::transport::Transport;
use crate::Error;

mod auth;
mod encrypted;

pub use crate::auth::AuthStatus;

/// Configuration of a client session.
#[derive(Debug, Clone)]
pub struct Config {
    /// The username to authenticate as, used whenever a driver is called
    /// without an explicit one.
    pub username: String,
    /// Private key files for the automatic public-key cascade, without
    /// their `.pub` suffix.
    pub identities: Vec<PathBuf>,
    /// How long a driver may wait for the server's answer on a blocking
    /// transport. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            username: std::env::var("USER").unwrap_or_default(),
            identities: default_identities(),
            timeout: None,
        }
    }
}

fn default_identities() -> Vec<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) => ["id_ed25519", "id_ecdsa", "id_rsa"]
            .iter()
            .map(|name| Path::new(&home).join(".ssh").join(name))
            .collect(),
        None => Vec::new(),
    }
}

/// A client-side authentication session over an established transport.
pub struct Session<T: Transport> {
    pub(crate) transport: T,
    pub(crate) config: Config,
    pub(crate) auth_state: AuthState,
    pub(crate) pending: PendingCall,
    pub(crate) methods: MethodSet,
    pub(crate) banner: Option<String>,
    pub(crate) kbdint: Option<Kbdint>,
    pub(crate) authenticated: bool,
    /// Set on the first fatal protocol error; every later driver call is
    /// refused.
    pub(crate) defunct: bool,
    pub(crate) agent_state: Option<AgentAuthState>,
    pub(crate) auto_state: Option<AutoAuthState>,
    /// Scratch for signature buffers, wiped on drop and reallocation.
    pub(crate) buffer: CryptoVec,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: Config) -> Self {
        Session {
            transport,
            config,
            auth_state: AuthState::None,
            pending: PendingCall::None,
            methods: MethodSet::empty(),
            banner: None,
            kbdint: None,
            authenticated: false,
            defunct: false,
            agent_state: None,
            auto_state: None,
            buffer: CryptoVec::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Give the transport back, e.g. to hand it to the connection layer
    /// once authenticated.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Whether the server has reported authentication success.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The methods the server listed in its last `USERAUTH_FAILURE`.
    /// Usually populated by probing with [`Session::userauth_none`]
    /// first.
    pub fn userauth_list(&self) -> MethodSet {
        self.methods
    }

    /// The most recent `USERAUTH_BANNER` sent by the server, if any.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Name of the current keyboard-interactive challenge.
    pub fn userauth_kbdint_name(&self) -> Option<&str> {
        self.kbdint.as_ref().map(|k| k.name())
    }

    /// Instruction of the current keyboard-interactive challenge.
    pub fn userauth_kbdint_instruction(&self) -> Option<&str> {
        self.kbdint.as_ref().map(|k| k.instruction())
    }

    /// Number of prompts in the current keyboard-interactive challenge,
    /// 0 when none is live.
    pub fn userauth_kbdint_nprompts(&self) -> usize {
        self.kbdint.as_ref().map_or(0, |k| k.nprompts())
    }

    /// Prompt `i` of the current challenge and whether the user's answer
    /// should be echoed while typed.
    pub fn userauth_kbdint_prompt(&self, i: usize) -> Option<(&str, bool)> {
        self.kbdint.as_ref().and_then(|k| k.prompt(i))
    }

    /// Answer prompt `i` of the current challenge. The answer is copied;
    /// both copies are zeroized when released.
    pub fn userauth_kbdint_set_answer(&mut self, i: usize, answer: &str) -> Result<(), Error> {
        match self.kbdint.as_mut() {
            Some(k) => k.set_answer(i, answer),
            None => Err(Error::Inconsistent),
        }
    }
}

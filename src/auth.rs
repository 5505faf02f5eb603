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

//! Authentication results and the session's authentication state.

bitflags! {
    /// Set of methods, represented by bit flags.
    pub struct MethodSet: u32 {
        /// The SSH `none` method (no authentication).
        const NONE = 1;
        /// The SSH `password` method (plaintext passwords).
        const PASSWORD = 2;
        /// The SSH `publickey` method (sign a challenge sent by the
        /// server).
        const PUBLICKEY = 4;
        /// The SSH `hostbased` method (certain hostnames are allowed
        /// by the server).
        const HOSTBASED = 8;
        /// The SSH `keyboard-interactive` method (answer to a
        /// challenge, where the "challenge" can be a password prompt,
        /// a bytestring to sign with a smartcard, or something else).
        const KEYBOARD_INTERACTIVE = 16;
    }
}

impl MethodSet {
    /// Parse one method name from a server's `USERAUTH_FAILURE` list.
    /// `none` is never listed by servers and is not recognized here.
    pub(crate) fn from_bytes(b: &[u8]) -> Option<MethodSet> {
        match b {
            b"password" => Some(MethodSet::PASSWORD),
            b"publickey" => Some(MethodSet::PUBLICKEY),
            b"hostbased" => Some(MethodSet::HOSTBASED),
            b"keyboard-interactive" => Some(MethodSet::KEYBOARD_INTERACTIVE),
            _ => None,
        }
    }
}

/// Outcome of one authentication driver call.
///
/// Fatal conditions (malformed packets, re-entrancy violations, broken
/// collaborators) are reported through [`crate::Error`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// The server rejected the credential.
    Denied,
    /// The server accepted the credential but requires another method
    /// before granting access.
    Partial,
    /// The server accepted the request. For a public-key *offer* this
    /// means the key is acceptable and may now be used to sign.
    Success,
    /// A keyboard-interactive challenge arrived; read the prompts, set
    /// the answers and call the keyboard-interactive driver again.
    Info,
    /// The transport would block; call the same driver again.
    Again,
}

/// Where the server-driven state machine currently stands. Mutated both
/// by the drivers (on send) and by the packet handlers (on receipt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthState {
    /// Initial state, or a request was just sent.
    None,
    /// A keyboard-interactive request or answer set was sent; message 60
    /// now means `USERAUTH_INFO_REQUEST`.
    KbdintSent,
    /// A keyboard-interactive challenge arrived.
    Info,
    /// The server accepted a public-key offer.
    PkOk,
    /// Partial success: more methods required.
    Partial,
    /// The server rejected the request.
    Failure,
    /// Authenticated.
    Success,
    /// A fatal protocol error occurred.
    Error,
}

impl AuthState {
    /// States that end one driver call. `None` and `KbdintSent` mean
    /// "keep reading packets".
    pub(crate) fn is_terminal(self) -> bool {
        !matches!(self, AuthState::None | AuthState::KbdintSent)
    }
}

/// Single-slot marker of the driver currently in flight. A driver sets
/// its marker before sending and clears it on any terminal outcome;
/// `Again` leaves it in place so the caller can resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingCall {
    None,
    AuthNone,
    Password,
    TryPublicKey,
    PublicKey,
    Agent,
    Kbdint,
}

/// Resume cursor of the agent cascade.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AgentAuthState {
    /// Index into the agent's identity list.
    pub index: usize,
    /// The offer for `index` succeeded; the signing round trip is next.
    pub signing: bool,
}

/// Resume cursor of the automatic public-key cascade.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AutoAuthState {
    /// Delegating to the agent cascade.
    Agent,
    /// Walking the configured identity files.
    File { index: usize, signing: bool },
}

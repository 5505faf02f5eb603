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

//! Client side of the SSH authentication protocol (RFC 4252), with
//! keyboard-interactive challenges (RFC 4256).
//!
//! This crate implements the `ssh-userauth` service as seen by a client:
//! the phase between a successful key exchange and the opening of the
//! first channel. It negotiates and proves a user identity through the
//! `none` probe, `password`, `publickey` (with or without an agent) and
//! `keyboard-interactive` methods, driving the server's replies through a
//! small state machine held on the [`client::Session`].
//!
//! Everything that is not the authentication protocol itself is a
//! collaborator, specified as a trait and supplied by the embedding SSH
//! stack:
//!
//! * [`transport::Transport`] frames, encrypts and delivers binary
//!   packets, and knows the session identifier of the first key exchange.
//! * [`key::PubKey`] and [`key::PrivateKey`] expose public-key blobs and
//!   signatures; [`key::KeyStore`] loads them from identity files.
//! * [`agent::Agent`] signs on the client's behalf without ever revealing
//!   private key material.
//!
//! Every driver call returns [`auth::AuthStatus`]. On a transport in
//! non-blocking mode a driver may return [`auth::AuthStatus::Again`]; the
//! caller must then re-invoke the *same* driver, which resumes where it
//! left off. Invoking a different driver while one is pending is a fatal
//! error. Passwords, keyboard-interactive answers and signature buffers
//! are kept in [`cryptovec::CryptoVec`] or zeroized storage so that
//! secrets are wiped before their memory is released.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[macro_use]
extern crate thiserror;

pub use cryptovec::CryptoVec;

pub mod agent;
pub mod auth;
pub mod client;
pub mod encoding;
pub mod kbdint;
pub mod key;
pub mod msg;
pub mod transport;

/// Errors of the authentication layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The protocol is in an inconsistent state.
    #[error("Inconsistent state of the protocol")]
    Inconsistent,

    /// Index out of bounds.
    #[error("Index out of bounds")]
    IndexOutOfBounds,

    /// Connection timeout.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// A driver was invoked while a different driver's request was still
    /// in flight.
    #[error("A different authentication request is pending")]
    PendingCallMismatch,

    /// The session suffered a fatal protocol error earlier; no further
    /// authentication request is accepted.
    #[error("The session is unusable after a fatal protocol error")]
    Defunct,

    /// The server sent a keyboard-interactive challenge with no prompt,
    /// or with more prompts than [`kbdint::MAX_PROMPTS`].
    #[error("Invalid number of keyboard-interactive prompts")]
    PromptCount,

    /// The key store or a key operation failed.
    #[error("Key error: {0}")]
    Keys(#[source] anyhow::Error),

    /// The SSH agent failed or refused to sign.
    #[error("Agent error: {0}")]
    Agent(#[source] anyhow::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

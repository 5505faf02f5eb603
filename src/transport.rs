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

//! The transport collaborator: an encrypted, packet-framed SSH
//! connection that has completed its first key exchange.

use std::time::Duration;

use crate::Error;

/// What the authentication layer needs from the transport underneath it.
///
/// Payloads start at the message-number byte; packet framing, encryption,
/// MAC and compression are entirely the transport's business.
pub trait Transport {
    /// Ask the server for a protocol service (here always
    /// `ssh-userauth`). Returns `Ok(false)` while the request is still
    /// in flight on a non-blocking connection; the caller retries.
    /// Idempotent once the service has been accepted.
    fn request_service(&mut self, name: &str) -> Result<bool, Error>;

    /// Queue one payload for sending as a framed packet.
    fn send(&mut self, payload: &[u8]) -> Result<(), Error>;

    /// Read the next incoming payload. `Ok(None)` means the underlying
    /// socket would block; [`Error::ConnectionTimeout`] means `timeout`
    /// elapsed on a blocking connection.
    fn read_packet(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, Error>;

    /// The session identifier: the exchange hash of the first key
    /// exchange, which authentication signatures are bound to.
    fn session_id(&self) -> &[u8];

    /// Called exactly once, when the server reports authentication
    /// success. A transport that negotiated `zlib@openssh.com` turns on
    /// compression for both directions here; any other transport does
    /// nothing.
    fn activate_delayed_compression(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

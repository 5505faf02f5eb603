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

//! Handlers for the packets the server sends during authentication, and
//! the receive loop the drivers block on.

use super::Session;
use crate::auth::{AuthState, AuthStatus, MethodSet};
use crate::encoding::Reader;
use crate::kbdint::{self, Kbdint, Prompt};
use crate::msg;
use crate::transport::Transport;
use crate::Error;

impl<T: Transport> Session<T> {
    /// Read packets until the state machine leaves its waiting states,
    /// and translate the terminal state into the driver's result.
    ///
    /// Returns `Again` when the transport would block; the caller keeps
    /// its pending marker and resumes later. A handler error marks the
    /// session defunct before propagating.
    pub(crate) fn wait_auth_response(&mut self) -> Result<AuthStatus, Error> {
        while !self.auth_state.is_terminal() {
            match self.transport.read_packet(self.config.timeout)? {
                Some(buf) => {
                    if let Err(e) = self.client_read_auth(&buf) {
                        self.auth_state = AuthState::Error;
                        self.defunct = true;
                        return Err(e);
                    }
                }
                None => return Ok(AuthStatus::Again),
            }
        }
        match self.auth_state {
            AuthState::Failure => Ok(AuthStatus::Denied),
            AuthState::Partial => Ok(AuthStatus::Partial),
            AuthState::Info => Ok(AuthStatus::Info),
            AuthState::PkOk | AuthState::Success => Ok(AuthStatus::Success),
            AuthState::Error => Err(Error::Defunct),
            AuthState::None | AuthState::KbdintSent => unreachable!(),
        }
    }

    /// Route one incoming payload by message number. Packets that are
    /// not part of the authentication exchange are logged and dropped.
    fn client_read_auth(&mut self, buf: &[u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Err(Error::Inconsistent);
        }
        match buf[0] {
            msg::USERAUTH_BANNER => self.read_auth_banner(buf),
            msg::USERAUTH_FAILURE => self.read_auth_failure(buf),
            msg::USERAUTH_SUCCESS => self.read_auth_success(),
            // One wire number, two meanings: the current state decides,
            // not the payload.
            msg::USERAUTH_PK_OK => {
                if self.auth_state == AuthState::KbdintSent {
                    self.read_auth_info_request(buf)
                } else {
                    debug!("userauth_pk_ok");
                    self.auth_state = AuthState::PkOk;
                    Ok(())
                }
            }
            m => {
                info!("unhandled packet during authentication: {:?}", m);
                Ok(())
            }
        }
    }

    fn read_auth_banner(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut r = buf.reader(1);
        let banner = std::str::from_utf8(r.read_string()?)?;
        // Language tag; some servers omit it.
        let _ = r.read_string();
        debug!("userauth_banner");
        self.banner = Some(banner.to_string());
        Ok(())
    }

    fn read_auth_failure(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut r = buf.reader(1);
        let remaining_methods = r.read_string()?;
        let partial = r.read_byte()? != 0;
        debug!(
            "userauth_failure, partial = {:?}, remaining methods {:?}",
            partial,
            std::str::from_utf8(remaining_methods)
        );
        let mut methods = MethodSet::empty();
        for method in remaining_methods.split(|&c| c == b',') {
            if let Some(m) = MethodSet::from_bytes(method) {
                methods |= m
            }
        }
        self.methods = methods;
        self.auth_state = if partial {
            AuthState::Partial
        } else {
            AuthState::Failure
        };
        Ok(())
    }

    fn read_auth_success(&mut self) -> Result<(), Error> {
        debug!("userauth_success");
        self.auth_state = AuthState::Success;
        self.authenticated = true;
        self.kbdint = None;
        // The single activation point for zlib@openssh.com.
        self.transport.activate_delayed_compression()
    }

    fn read_auth_info_request(&mut self, buf: &[u8]) -> Result<(), Error> {
        // A new challenge replaces whatever scratch was left over, and a
        // malformed one must not leave a half-parsed scratch behind.
        self.kbdint = None;
        let mut r = buf.reader(1);
        let name = std::str::from_utf8(r.read_string()?)?.to_string();
        let instruction = std::str::from_utf8(r.read_string()?)?.to_string();
        let _lang = r.read_string()?;
        let nprompts = r.read_u32()? as usize;
        debug!("userauth_info_request, {:?} prompts", nprompts);
        if nprompts == 0 || nprompts > kbdint::MAX_PROMPTS {
            return Err(Error::PromptCount);
        }
        let mut prompts = Vec::with_capacity(nprompts);
        for _ in 0..nprompts {
            let text = std::str::from_utf8(r.read_string()?)?.to_string();
            let echo = r.read_byte()? != 0;
            prompts.push(Prompt { text, echo });
        }
        self.kbdint = Some(Kbdint::new(name, instruction, prompts));
        self.auth_state = AuthState::Info;
        Ok(())
    }
}

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

//! The SSH agent collaborator: an out-of-process key custodian that
//! enumerates identities and signs on the client's behalf. Private key
//! material never crosses this interface.

use cryptovec::CryptoVec;

use crate::encoding::Encoding;
use crate::key::PubKey;

/// One identity held by the agent: the public blob and its algorithm, as
/// returned by an identities request.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub algo: String,
    pub blob: Vec<u8>,
    pub comment: String,
}

impl PubKey for AgentIdentity {
    fn name(&self) -> &str {
        &self.algo
    }
    fn push_to(&self, buffer: &mut CryptoVec) {
        buffer.extend_ssh_string(&self.blob)
    }
}

/// Client of a running SSH agent.
pub trait Agent {
    /// The identities currently held by the agent, in the agent's
    /// preference order.
    fn identities(&mut self) -> Result<Vec<AgentIdentity>, anyhow::Error>;

    /// Ask the agent to sign `to_sign` with `key`. Returns the input
    /// buffer with the signature appended as an SSH `string` containing
    /// `string algorithm, string signature`; an agent that refuses the
    /// key returns an error.
    fn sign_request(
        &mut self,
        key: &AgentIdentity,
        to_sign: CryptoVec,
    ) -> Result<CryptoVec, anyhow::Error>;
}

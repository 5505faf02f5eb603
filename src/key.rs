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

//! The PKI collaborator, at the interface level.
//!
//! This crate never touches cryptographic material itself: keys are
//! opaque values that can name their algorithm, emit their public blob,
//! and (for private keys) sign a buffer. The embedding stack implements
//! these traits with whatever key backend it uses.

use std::path::Path;

use cryptovec::CryptoVec;

/// The public half of a key: its algorithm name and its wire blob.
pub trait PubKey {
    /// The SSH name of the key algorithm, e.g. `ssh-ed25519`.
    fn name(&self) -> &str;
    /// Push the public key blob to `buffer`, as an SSH `string`.
    fn push_to(&self, buffer: &mut CryptoVec);
}

/// A key whose private half is available for signing.
///
/// Offering a key to the server needs only [`PubKey`]; producing the
/// authentication signature needs this trait. The split makes the
/// "public key where a private one is required" class of mistakes
/// unrepresentable.
pub trait PrivateKey: PubKey {
    /// Sign the current contents of `buffer` and append the signature as
    /// an SSH `string` containing `string algorithm, string signature`,
    /// per RFC 4252 §7.
    fn add_self_signature(&self, buffer: &mut CryptoVec) -> Result<(), anyhow::Error>;
}

/// Asks the user for a secret, e.g. the passphrase of an encrypted
/// identity file. `echo` is false when the input must not be displayed.
pub trait Prompt {
    fn prompt(&mut self, text: &str, echo: bool) -> Result<String, anyhow::Error>;
}

impl<F> Prompt for F
where
    F: FnMut(&str, bool) -> Result<String, anyhow::Error>,
{
    fn prompt(&mut self, text: &str, echo: bool) -> Result<String, anyhow::Error> {
        self(text, echo)
    }
}

/// Loads and persists identity files for the automatic public-key
/// cascade.
pub trait KeyStore {
    type Public: PubKey;
    type Private: PrivateKey;

    /// Import a public key file. `Ok(None)` means the file does not
    /// exist; any other failure is an error.
    fn import_public(&self, path: &Path) -> Result<Option<Self::Public>, anyhow::Error>;

    /// Import a private key file, decrypting it with `passphrase` or by
    /// asking `prompt` when the file is encrypted.
    fn import_private(
        &self,
        path: &Path,
        passphrase: Option<&str>,
        prompt: Option<&mut dyn Prompt>,
    ) -> Result<Self::Private, anyhow::Error>;

    /// Write the public half of `key` to `path`.
    fn write_public(&self, key: &Self::Private, path: &Path) -> Result<(), anyhow::Error>;
}

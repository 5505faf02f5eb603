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

//! Per-exchange scratch of a keyboard-interactive challenge (RFC 4256).
//!
//! One value lives on the session from the arrival of a
//! `USERAUTH_INFO_REQUEST` until its answers are sent. Prompts with
//! `echo == false` and every answer are treated as secrets: the whole
//! scratch is zeroized when replaced by the next challenge, consumed, or
//! dropped with the session.

use cryptovec::CryptoVec;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::encoding::Encoding;
use crate::Error;

/// Ceiling on the number of prompts accepted in a single
/// `USERAUTH_INFO_REQUEST`. Challenges beyond this are a fatal protocol
/// error, which bounds what a hostile server can make us allocate.
pub const MAX_PROMPTS: usize = 32;

/// One challenge prompt and its echo flag. `echo == false` marks the
/// answer (and the prompt itself) as sensitive.
#[derive(Debug, Zeroize)]
pub(crate) struct Prompt {
    pub text: String,
    pub echo: bool,
}

/// The scratch of the keyboard-interactive exchange in progress.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct Kbdint {
    name: String,
    instruction: String,
    prompts: Vec<Prompt>,
    /// Lazily allocated to the prompt count on the first answer.
    answers: Vec<Option<String>>,
}

impl Kbdint {
    pub fn new(name: String, instruction: String, prompts: Vec<Prompt>) -> Self {
        Kbdint {
            name,
            instruction,
            prompts,
            answers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn nprompts(&self) -> usize {
        self.prompts.len()
    }

    pub fn prompt(&self, i: usize) -> Option<(&str, bool)> {
        self.prompts.get(i).map(|p| (p.text.as_str(), p.echo))
    }

    /// Store a copy of `answer` for prompt `i`. A previous answer in the
    /// slot is zeroized before being replaced. `i` past the prompt count
    /// is an error.
    pub fn set_answer(&mut self, i: usize, answer: &str) -> Result<(), Error> {
        if i >= self.prompts.len() {
            return Err(Error::IndexOutOfBounds);
        }
        if self.answers.is_empty() {
            self.answers.resize_with(self.prompts.len(), || None);
        }
        if let Some(old) = self.answers[i].as_mut() {
            old.zeroize();
        }
        self.answers[i] = Some(answer.to_string());
        Ok(())
    }

    /// Append `uint32 num-responses` and one string per prompt to the
    /// outgoing `USERAUTH_INFO_RESPONSE`. Unanswered prompts are sent as
    /// empty strings.
    pub fn push_responses(&self, buffer: &mut CryptoVec) {
        buffer.push_u32_be(self.prompts.len() as u32);
        for i in 0..self.prompts.len() {
            match self.answers.get(i).and_then(|a| a.as_ref()) {
                Some(answer) => buffer.extend_ssh_string(answer.as_bytes()),
                None => buffer.extend_ssh_string(b""),
            }
        }
    }
}

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

//! SSH wire primitives: length-prefixed `string`s, `byte`s and big-endian
//! `uint32`s, written into a [`CryptoVec`] and read back through a
//! [`Position`] cursor.

use byteorder::{BigEndian, ByteOrder};
use cryptovec::CryptoVec;

use crate::Error;

/// Encode in the SSH format.
pub trait Encoding {
    /// Push an SSH-encoded string to `self`.
    fn extend_ssh_string(&mut self, s: &[u8]);
    /// Push a `u32`, big endian.
    fn push_u32_be(&mut self, i: u32);
}

impl Encoding for CryptoVec {
    fn extend_ssh_string(&mut self, s: &[u8]) {
        self.push_u32_be(s.len() as u32);
        self.extend(s);
    }
    fn push_u32_be(&mut self, i: u32) {
        let mut buf = [0; 4];
        BigEndian::write_u32(&mut buf, i);
        self.extend(&buf)
    }
}

/// A cursor-based reader of the SSH format.
pub trait Reader {
    /// Create a new `Position`, starting at `starting_at` in `self`.
    fn reader(&self, starting_at: usize) -> Position;
}

impl Reader for CryptoVec {
    fn reader(&self, starting_at: usize) -> Position {
        Position {
            s: self,
            position: starting_at,
        }
    }
}

impl Reader for [u8] {
    fn reader(&self, starting_at: usize) -> Position {
        Position {
            s: self,
            position: starting_at,
        }
    }
}

/// A cursor into a slice encoded in the SSH format.
#[derive(Debug)]
pub struct Position<'a> {
    s: &'a [u8],
    pub position: usize,
}

impl<'a> Position<'a> {
    /// Read one string from this reader.
    pub fn read_string(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32()? as usize;
        if self.position + len <= self.s.len() {
            let result = &self.s[self.position..(self.position + len)];
            self.position += len;
            Ok(result)
        } else {
            Err(Error::IndexOutOfBounds)
        }
    }
    /// Read a `u32` from this reader.
    pub fn read_u32(&mut self) -> Result<u32, Error> {
        if self.position + 4 <= self.s.len() {
            let u = BigEndian::read_u32(&self.s[self.position..]);
            self.position += 4;
            Ok(u)
        } else {
            Err(Error::IndexOutOfBounds)
        }
    }
    /// Read one byte from this reader.
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        if self.position + 1 <= self.s.len() {
            let u = self.s[self.position];
            self.position += 1;
            Ok(u)
        } else {
            Err(Error::IndexOutOfBounds)
        }
    }
}

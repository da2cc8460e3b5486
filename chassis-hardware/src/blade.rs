// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// 1-based index of a blade slot in the chassis.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct BladeId(pub u8);

impl BladeId {
    /// Iterate over every blade id in a chassis of `count` blades.
    pub fn all(count: u8) -> impl Iterator<Item = BladeId> {
        (1..=count).map(BladeId)
    }

    /// Zero-based index into per-blade tables, if `self` is within a chassis
    /// of `count` blades.
    pub fn index(self, count: u8) -> Option<usize> {
        if self.0 >= 1 && self.0 <= count {
            Some(usize::from(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Display for BladeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for BladeId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BladeType {
    Server,
    Storage,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn is_on(self) -> bool {
        self == PowerState::On
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blade_index() {
        assert_eq!(BladeId(1).index(24), Some(0));
        assert_eq!(BladeId(24).index(24), Some(23));
        assert_eq!(BladeId(0).index(24), None);
        assert_eq!(BladeId(25).index(24), None);
        assert_eq!(
            BladeId::all(3).collect::<Vec<_>>(),
            vec![BladeId(1), BladeId(2), BladeId(3)]
        );
    }

    #[test]
    fn test_blade_type_serde() {
        let t: BladeType = serde_json::from_str("\"storage\"").unwrap();
        assert_eq!(t, BladeType::Storage);
        assert_eq!(serde_json::to_string(&BladeId(7)).unwrap(), "7");
    }
}

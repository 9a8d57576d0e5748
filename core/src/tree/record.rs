//! Tree records — the state each node publishes over gossip
//!
//! Wire layouts (parent id big-endian):
//!
//! - base, 4 bytes: `[distance][parent hi][parent lo][children]`
//! - energy tie-break / energy weighted, 5 bytes: base + `[energy]`
//! - energy classes, 8 bytes: base + `[d_high][d_mid][d_low][energy]`
//!
//! `distance = 0xFF` means undefined, `0` means root. `parent = 0` means
//! undefined, `0xFFFF` means "I am root". A root record carries
//! `children = 0xFF` as a sentinel.

use crate::radio::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Distance sentinel for "not attached to any tree".
pub const DIST_UNDEFINED: u8 = 0xFF;

/// Largest usable distance; arithmetic saturates here so it can never
/// collide with the sentinel.
pub const DIST_MAX: u8 = 0xFE;

/// Parent sentinel for "no parent elected".
pub const PARENT_NONE: NodeId = 0;

/// Parent sentinel published by the root.
pub const PARENT_ROOT: NodeId = 0xFFFF;

/// Children sentinel published by the root.
pub const CHILDREN_ROOT: u8 = 0xFF;

/// Which flavor of the protocol a network runs. All nodes of one network
/// must agree, since the flavor fixes the record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Hop-count tree, leaf-maximizing tie-breaks.
    Base,
    /// Base election, but equal-distance ties prefer energy-rich parents.
    EnergyTiebreak,
    /// Three candidate trees (high/mid/low) advertised in one record.
    EnergyClasses,
    /// Single tree over energy-weighted edges.
    EnergyWeighted,
}

impl Variant {
    /// Fixed record size on the wire.
    pub fn wire_len(&self) -> usize {
        match self {
            Variant::Base => 4,
            Variant::EnergyTiebreak | Variant::EnergyWeighted => 5,
            Variant::EnergyClasses => 8,
        }
    }

    pub fn is_energy_aware(&self) -> bool {
        !matches!(self, Variant::Base)
    }
}

/// Coarse battery classification published in the energy-aware variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EnergyClass {
    Undefined = 0,
    High = 1,
    Mid = 2,
    Low = 3,
}

impl fmt::Display for EnergyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergyClass::Undefined => write!(f, "undefined"),
            EnergyClass::High => write!(f, "high"),
            EnergyClass::Mid => write!(f, "mid"),
            EnergyClass::Low => write!(f, "low"),
        }
    }
}

impl EnergyClass {
    pub fn from_u8(value: u8) -> Result<Self, RecordError> {
        match value {
            0 => Ok(EnergyClass::Undefined),
            1 => Ok(EnergyClass::High),
            2 => Ok(EnergyClass::Mid),
            3 => Ok(EnergyClass::Low),
            other => Err(RecordError::BadEnergy(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Sort rank for energy tie-breaks: lower is better, undefined loses to
    /// everything.
    pub fn rank(&self) -> u8 {
        match self {
            EnergyClass::Undefined => 4,
            other => other.as_u8(),
        }
    }

    /// Edge weight in the energy-weighted variant; undefined weighs like low.
    pub fn weight(&self) -> u8 {
        match self {
            EnergyClass::Undefined => EnergyClass::Low.as_u8(),
            other => other.as_u8(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("unknown energy class {0:#04x}")]
    BadEnergy(u8),
}

/// A node's published state. The energy and class-distance fields ride along
/// unused in the variants that do not carry them on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub distance: u8,
    pub parent: NodeId,
    pub children: u8,
    pub energy: EnergyClass,
    /// Hop counts in the high/mid/low candidate trees (energy-classes only).
    pub class_distance: [u8; 3],
}

impl Record {
    /// The detached state every non-root node starts from.
    pub fn undefined() -> Self {
        Record {
            distance: DIST_UNDEFINED,
            parent: PARENT_NONE,
            children: 0,
            energy: EnergyClass::Undefined,
            class_distance: [DIST_UNDEFINED; 3],
        }
    }

    /// The fixed record the root publishes unconditionally. The root is the
    /// powered sink, so it advertises high energy and distance zero in every
    /// candidate tree.
    pub fn root() -> Self {
        Record {
            distance: 0,
            parent: PARENT_ROOT,
            children: CHILDREN_ROOT,
            energy: EnergyClass::High,
            class_distance: [0; 3],
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.parent == PARENT_NONE
    }

    pub fn is_root_record(&self) -> bool {
        self.parent == PARENT_ROOT
    }

    pub fn encode(&self, variant: Variant) -> Vec<u8> {
        let mut buf = Vec::with_capacity(variant.wire_len());
        buf.push(self.distance);
        buf.extend_from_slice(&self.parent.to_be_bytes());
        buf.push(self.children);
        match variant {
            Variant::Base => {}
            Variant::EnergyTiebreak | Variant::EnergyWeighted => buf.push(self.energy.as_u8()),
            Variant::EnergyClasses => {
                buf.extend_from_slice(&self.class_distance);
                buf.push(self.energy.as_u8());
            }
        }
        buf
    }

    pub fn decode(variant: Variant, bytes: &[u8]) -> Result<Self, RecordError> {
        let need = variant.wire_len();
        if bytes.len() < need {
            return Err(RecordError::Truncated {
                need,
                got: bytes.len(),
            });
        }
        let mut rec = Record {
            distance: bytes[0],
            parent: NodeId::from_be_bytes([bytes[1], bytes[2]]),
            children: bytes[3],
            energy: EnergyClass::Undefined,
            class_distance: [DIST_UNDEFINED; 3],
        };
        match variant {
            Variant::Base => {}
            Variant::EnergyTiebreak | Variant::EnergyWeighted => {
                rec.energy = EnergyClass::from_u8(bytes[4])?;
            }
            Variant::EnergyClasses => {
                rec.class_distance = [bytes[4], bytes[5], bytes[6]];
                rec.energy = EnergyClass::from_u8(bytes[7])?;
            }
        }
        Ok(rec)
    }
}

/// Change-significance test registered with the gossip instance: only parent
/// or children movements matter. Distance drifts alone stay quiet so routine
/// re-publications do not keep the whole neighborhood awake. Records that do
/// not decode are always significant.
pub fn change_is_significant(variant: Variant, old: &[u8], new: &[u8]) -> bool {
    match (Record::decode(variant, old), Record::decode(variant, new)) {
        (Ok(a), Ok(b)) => a.parent != b.parent || a.children != b.children,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_wire_layout() {
        let rec = Record {
            distance: 2,
            parent: 0x0102,
            children: 3,
            energy: EnergyClass::Undefined,
            class_distance: [DIST_UNDEFINED; 3],
        };
        assert_eq!(rec.encode(Variant::Base), vec![2, 0x01, 0x02, 3]);
        assert_eq!(Record::decode(Variant::Base, &[2, 0x01, 0x02, 3]).unwrap(), rec);
    }

    #[test]
    fn test_root_record_sentinels() {
        let bytes = Record::root().encode(Variant::Base);
        assert_eq!(bytes, vec![0, 0xFF, 0xFF, 0xFF]);
        let rec = Record::decode(Variant::Base, &bytes).unwrap();
        assert!(rec.is_root_record());
        assert_eq!(rec.distance, 0);
        assert_eq!(rec.children, CHILDREN_ROOT);
    }

    #[test]
    fn test_energy_class_wire_layout() {
        let rec = Record {
            distance: 4,
            parent: 7,
            children: 1,
            energy: EnergyClass::Mid,
            class_distance: [2, 3, 4],
        };
        let bytes = rec.encode(Variant::EnergyClasses);
        assert_eq!(bytes, vec![4, 0x00, 0x07, 1, 2, 3, 4, 2]);
        assert_eq!(Record::decode(Variant::EnergyClasses, &bytes).unwrap(), rec);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let err = Record::decode(Variant::EnergyTiebreak, &[1, 0, 2, 0]).unwrap_err();
        assert_eq!(err, RecordError::Truncated { need: 5, got: 4 });
    }

    #[test]
    fn test_bad_energy_rejected() {
        let err = Record::decode(Variant::EnergyTiebreak, &[1, 0, 2, 0, 9]).unwrap_err();
        assert_eq!(err, RecordError::BadEnergy(9));
    }

    #[test]
    fn test_undefined_record_couples_parent_and_distance() {
        let rec = Record::undefined();
        assert_eq!(rec.distance, DIST_UNDEFINED);
        assert_eq!(rec.parent, PARENT_NONE);
        assert!(rec.is_undefined());
    }

    #[test]
    fn test_distance_alone_is_not_significant() {
        let a = Record {
            distance: 2,
            parent: 7,
            children: 1,
            energy: EnergyClass::Undefined,
            class_distance: [DIST_UNDEFINED; 3],
        };
        let mut b = a;
        b.distance = 3;
        assert!(!change_is_significant(
            Variant::Base,
            &a.encode(Variant::Base),
            &b.encode(Variant::Base)
        ));

        b.children = 2;
        assert!(change_is_significant(
            Variant::Base,
            &a.encode(Variant::Base),
            &b.encode(Variant::Base)
        ));

        let mut c = a;
        c.parent = 9;
        assert!(change_is_significant(
            Variant::Base,
            &a.encode(Variant::Base),
            &c.encode(Variant::Base)
        ));
    }

    #[test]
    fn test_energy_rank_and_weight() {
        assert!(EnergyClass::High.rank() < EnergyClass::Mid.rank());
        assert!(EnergyClass::Mid.rank() < EnergyClass::Low.rank());
        assert!(EnergyClass::Low.rank() < EnergyClass::Undefined.rank());
        assert_eq!(EnergyClass::Undefined.weight(), EnergyClass::Low.weight());
    }
}

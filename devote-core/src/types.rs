//! Fixed-width identifiers shared by every consensus table
//!
//! `Hash`, `Address` and `MasternodeId` are plain byte arrays with a hex
//! text form. Human-readable serializers (JSON, TOML) see the hex string;
//! binary serializers (bincode) see the raw bytes, which keeps the canonical
//! encodings fixed-width.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a state root or digest
pub const HASH_LENGTH: usize = 32;

/// Length of an account address
pub const ADDRESS_LENGTH: usize = 20;

/// Length of a masternode identifier
pub const MASTERNODE_ID_LENGTH: usize = 8;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Borrow the raw bytes
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Lowercase hex without a `0x` prefix
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = crate::TrieError;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    crate::TrieError::Encoding(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok($name(array))
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            /// Parse hex, with or without a leading `0x`
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(digits, &mut bytes)?;
                Ok($name(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let text = String::deserialize(deserializer)?;
                    text.parse().map_err(D::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map($name)
                }
            }
        }
    };
}

fixed_bytes!(
    /// A 32-byte keccak digest, used for every map root
    Hash,
    HASH_LENGTH
);

fixed_bytes!(
    /// A 20-byte account address
    Address,
    ADDRESS_LENGTH
);

fixed_bytes!(
    /// The fixed-width identifier a masternode registers under
    MasternodeId,
    MASTERNODE_ID_LENGTH
);

impl Hash {
    /// Root of an empty map
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);

    /// Whether this is the empty-map root
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

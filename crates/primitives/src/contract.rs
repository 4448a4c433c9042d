use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::buf::Buf32;

macro_rules! buf32_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy,
            Clone,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            BorshSerialize,
            BorshDeserialize,
            Serialize,
            Deserialize,
        )]
        pub struct $name(Buf32);

        impl $name {
            pub const fn new(buf: Buf32) -> Self {
                Self(buf)
            }

            pub fn inner(&self) -> &Buf32 {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                self.0.as_bytes()
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(Buf32::new(bytes))
            }
        }

        impl From<Buf32> for $name {
            fn from(buf: Buf32) -> Self {
                Self(buf)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.0, f)
            }
        }
    };
}

buf32_newtype!(
    /// Address of a deployed contract.
    ContractAddress
);

buf32_newtype!(
    /// A 32-byte storage slot key within one contract's keyspace.
    StoragePointer
);

buf32_newtype!(
    /// The 32-byte value held at a storage pointer.
    StorageValue
);

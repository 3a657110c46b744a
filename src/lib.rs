//! Threshold proxy re-encryption (Umbral) over OpenSSL elliptic curves, and a
//! service that hands out time-bounded, delegated access with it.
//!
//! [`pre`] is the engine: encrypt to an owner, split a re-encryption key into
//! M-of-N fragments for a recipient, let proxies transform capsules, and have
//! the recipient verify and combine the results. [`service`] keeps owner keys
//! and fragment sets in a secret store and enforces expiry.
//!
//! ```no_run
//! use umbral_proxy::pre::*;
//!
//! let params = new_standard_params().unwrap();
//! let alice = KeyPair::new(&params).unwrap();
//! let signer = Signer::new(&params).unwrap();
//! let bob = KeyPair::new(&params).unwrap();
//!
//! let (capsule, ciphertext) = encrypt(alice.public_key(), b"HELLO").unwrap();
//! let kfrags = generate_kfrags(
//!     alice.secret_key(),
//!     bob.public_key(),
//!     &signer,
//!     2,
//!     3,
//!     true,
//!     true,
//! )
//! .unwrap();
//!
//! let cfrags: Vec<_> = kfrags[..2]
//!     .iter()
//!     .map(|kfrag| reencrypt(&capsule, kfrag).unwrap())
//!     .collect();
//! let plaintext = decrypt_reencrypted(
//!     bob.secret_key(),
//!     alice.public_key(),
//!     &capsule,
//!     &cfrags,
//!     &ciphertext,
//! )
//! .unwrap();
//! assert_eq!(plaintext, b"HELLO");
//! ```

pub mod internal;
pub mod pre;
pub mod service;

pub use crate::service::{ProxyService, ServiceConfig, ServiceError};

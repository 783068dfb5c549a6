//! a2utils TLS module
//!
//! Certificate work around Apache vhosts:
//! - Certificate inspection (expiry, covered names)
//! - certbot command lines and runs
//! - HTTP-01 challenge files, locally or over ssh
//! - Pre-flight diagnosis of why issuance would fail

pub mod cert;
pub mod certbot;
pub mod challenge;
pub mod diagnose;
pub mod probe;
pub mod ssh;

pub use cert::{CertError, CertInfo};
pub use certbot::{live_paths, Authenticator, CertbotError, CertbotRequest, LivePaths};
pub use challenge::{ChallengeDeployer, ChallengeError, ChallengeFile, SshDeployer, WebrootDeployer};
pub use diagnose::{Diagnoser, Problem};
pub use probe::ProbeError;
pub use ssh::{SshError, SshTarget};

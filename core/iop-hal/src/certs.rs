//! # Trust Anchor Bundle
//!
//! Read-only index of hardcoded root certificates, generated at build
//! time and linked into flash. The TLS engine calls [`find_anchor`] with
//! the hashed distinguished name of the CA it needs during handshake;
//! the bundle answers with a parsed anchor or nothing.
//!
//! No dynamic state: entries reference `'static` data, lookups are a
//! linear scan with constant-size compares, and the returned anchor is
//! an owned value the caller drops when the handshake is done.
//!
//! [`find_anchor`]: CertificateBundle::find_anchor

/// Hashed-DN length used as the bundle index key.
pub const DN_HASH_LEN: usize = 32;

/// One certificate: DER bytes plus the hash of its subject DN.
#[derive(Debug, Clone, Copy)]
pub struct CertEntry {
    pub der: &'static [u8],
    pub dn_hash: &'static [u8; DN_HASH_LEN],
}

/// The generated bundle. Constructed once in static context.
#[derive(Debug, Clone, Copy)]
pub struct CertificateBundle {
    entries: &'static [CertEntry],
}

/// A parsed trust anchor handed to the TLS engine. The `dn` field is
/// overwritten with the hash the engine asked for, which is what it
/// matches against during chain validation.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub dn: [u8; DN_HASH_LEN],
    pub der: &'static [u8],
}

impl CertificateBundle {
    pub const fn new(entries: &'static [CertEntry]) -> Self {
        Self { entries }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Looks up the anchor whose DN hash matches `hashed_dn`.
    ///
    /// Queries of the wrong length miss by definition — the bundle is
    /// keyed by 32-byte hashes only.
    pub fn find_anchor(&self, hashed_dn: &[u8]) -> Option<TrustAnchor> {
        if hashed_dn.len() != DN_HASH_LEN {
            return None;
        }
        for entry in self.entries {
            if entry.dn_hash[..] == *hashed_dn {
                let mut dn = [0u8; DN_HASH_LEN];
                dn.copy_from_slice(hashed_dn);
                return Some(TrustAnchor { dn, der: entry.der });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static CERT_A: [u8; 4] = [0x30, 0x82, 0x01, 0x0A];
    static CERT_B: [u8; 3] = [0x30, 0x81, 0x02];
    static HASH_A: [u8; DN_HASH_LEN] = [0xAA; DN_HASH_LEN];
    static HASH_B: [u8; DN_HASH_LEN] = [0xBB; DN_HASH_LEN];

    static ENTRIES: [CertEntry; 2] = [
        CertEntry { der: &CERT_A, dn_hash: &HASH_A },
        CertEntry { der: &CERT_B, dn_hash: &HASH_B },
    ];

    static BUNDLE: CertificateBundle = CertificateBundle::new(&ENTRIES);

    #[test]
    fn finds_matching_anchor_and_stamps_queried_dn() {
        let anchor = BUNDLE.find_anchor(&[0xBB; DN_HASH_LEN]).unwrap();
        assert_eq!(anchor.der, &CERT_B[..]);
        assert_eq!(anchor.dn, [0xBB; DN_HASH_LEN]);
    }

    #[test]
    fn misses_return_none() {
        assert!(BUNDLE.find_anchor(&[0xCC; DN_HASH_LEN]).is_none());
    }

    #[test]
    fn wrong_length_queries_miss() {
        assert!(BUNDLE.find_anchor(&[0xAA; 16]).is_none());
        assert!(BUNDLE.find_anchor(&[]).is_none());
    }

    #[test]
    fn count_reports_bundle_size() {
        assert_eq!(BUNDLE.count(), 2);
    }
}

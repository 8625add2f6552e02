#[derive(Clone, Copy, Debug)]
pub(crate) struct Fnv1a64(u64);

impl Fnv1a64 {
    pub(crate) const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;

    pub(crate) fn new_default() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    pub(crate) fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        let mut h = self.0;
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(Self::PRIME);
        }
        self.0 = h;
    }

    pub(crate) fn finish(self) -> u64 {
        self.0
    }
}

/// Bytes of payload folded into a sample digest.
///
/// Full-frame hashing is too slow for large frames; the prefix plus the total length is enough to
/// tell replaced frames from decoded ones.
pub(crate) const DIGEST_PREFIX_BYTES: usize = 4096;

pub(crate) fn payload_digest(bytes: &[u8]) -> u64 {
    let mut h = Fnv1a64::new_default();
    h.write_u64(bytes.len() as u64);
    h.write_bytes(&bytes[..bytes.len().min(DIGEST_PREFIX_BYTES)]);
    h.finish()
}

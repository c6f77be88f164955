//! CityHash v1.0.2, 128-bit variant.
//!
//! The server checksums every compressed frame with this exact revision of
//! the hash. Later CityHash releases changed the mixing, so none of them are
//! interchangeable with it.

const K0: u64 = 0xc3a5_c85c_97cb_3127;
const K1: u64 = 0xb492_b66f_be98_f273;
const K2: u64 = 0x9ae1_6a3b_2f90_404f;
const K3: u64 = 0xc949_d7c7_509e_6557;
const K_MUL: u64 = 0x9ddf_ea08_eb38_2d69;

/// CityHash128 digest split into low/high u64 words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CityHash128 {
    pub low: u64,
    pub high: u64,
}

impl CityHash128 {
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let (low, high) = hash128(data);
        Self { low, high }
    }

    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        *self == Self::compute(data)
    }

    /// Wire form: low word, then high word, both little-endian.
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 16] {
        let mut out = [0_u8; 16];
        out[..8].copy_from_slice(&self.low.to_le_bytes());
        out[8..].copy_from_slice(&self.high.to_le_bytes());
        out
    }

    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        let (low, high) = bytes.split_at(8);
        Self {
            low: fetch64(low, 0),
            high: fetch64(high, 0),
        }
    }
}

/// Hash `data`, returning `(low, high)`.
#[must_use]
pub fn hash128(data: &[u8]) -> (u64, u64) {
    let len = data.len();
    if len >= 16 {
        hash128_with_seed(
            &data[16..],
            (fetch64(data, 0) ^ K3, fetch64(data, 8)),
        )
    } else if len >= 8 {
        hash128_with_seed(
            &[],
            (
                fetch64(data, 0) ^ (len as u64).wrapping_mul(K0),
                fetch64(data, len - 8) ^ K1,
            ),
        )
    } else {
        hash128_with_seed(data, (K0, K1))
    }
}

/// Hash `data` from the seed `(low, high)`, returning `(low, high)`.
#[must_use]
pub fn hash128_with_seed(data: &[u8], seed: (u64, u64)) -> (u64, u64) {
    if data.len() < 128 {
        return city_murmur(data, seed);
    }

    let mut s = 0usize;
    let mut len = data.len();
    let (mut x, mut y) = seed;
    let mut z = (len as u64).wrapping_mul(K1);
    let v0 = rotate(y ^ K1, 49).wrapping_mul(K1).wrapping_add(fetch64(data, 0));
    let mut v = (
        v0,
        rotate(v0, 42).wrapping_mul(K1).wrapping_add(fetch64(data, 8)),
    );
    let mut w = (
        rotate(y.wrapping_add(z), 35).wrapping_mul(K1).wrapping_add(x),
        rotate(x.wrapping_add(fetch64(data, 88)), 53).wrapping_mul(K1),
    );

    loop {
        for _ in 0..2 {
            x = rotate(
                x.wrapping_add(y)
                    .wrapping_add(v.0)
                    .wrapping_add(fetch64(data, s + 16)),
                37,
            )
            .wrapping_mul(K1);
            y = rotate(y.wrapping_add(v.1).wrapping_add(fetch64(data, s + 48)), 42).wrapping_mul(K1);
            x ^= w.1;
            y ^= v.0;
            z = rotate(z ^ w.0, 33);
            v = weak_hash_len32_with_seeds(data, s, v.1.wrapping_mul(K1), x.wrapping_add(w.0));
            w = weak_hash_len32_with_seeds(data, s + 32, z.wrapping_add(w.1), y);
            std::mem::swap(&mut z, &mut x);
            s += 64;
        }
        len -= 128;
        if len < 128 {
            break;
        }
    }

    y = y.wrapping_add(rotate(w.0, 37).wrapping_mul(K0)).wrapping_add(z);
    x = x.wrapping_add(rotate(v.0.wrapping_add(z), 49).wrapping_mul(K0));

    // Up to four 32-byte chunks taken backwards from the end of the input.
    let mut tail_done = 0;
    while tail_done < len {
        tail_done += 32;
        y = rotate(y.wrapping_sub(x), 42).wrapping_mul(K0).wrapping_add(v.1);
        w.0 = w.0.wrapping_add(fetch64(data, s + len - tail_done + 16));
        x = rotate(x, 49).wrapping_mul(K0).wrapping_add(w.0);
        w.0 = w.0.wrapping_add(v.0);
        v = weak_hash_len32_with_seeds(data, s + len - tail_done, v.0, v.1);
    }

    x = hash_len16(x, v.0);
    y = hash_len16(y, w.0);
    (
        hash_len16(x.wrapping_add(v.1), w.1).wrapping_add(y),
        hash_len16(x.wrapping_add(w.1), y.wrapping_add(v.1)),
    )
}

fn city_murmur(data: &[u8], seed: (u64, u64)) -> (u64, u64) {
    let len = data.len();
    let (mut a, mut b) = seed;
    let mut c;
    let mut d;
    if len <= 16 {
        a = shift_mix(a.wrapping_mul(K1)).wrapping_mul(K1);
        c = b.wrapping_mul(K1).wrapping_add(hash_len0_to16(data));
        d = shift_mix(a.wrapping_add(if len >= 8 { fetch64(data, 0) } else { c }));
    } else {
        c = hash_len16(fetch64(data, len - 8).wrapping_add(K1), a);
        d = hash_len16(
            b.wrapping_add(len as u64),
            c.wrapping_add(fetch64(data, len - 16)),
        );
        a = a.wrapping_add(d);
        let mut s = 0;
        let mut remaining = len - 16;
        loop {
            a ^= shift_mix(fetch64(data, s).wrapping_mul(K1)).wrapping_mul(K1);
            a = a.wrapping_mul(K1);
            b ^= a;
            c ^= shift_mix(fetch64(data, s + 8).wrapping_mul(K1)).wrapping_mul(K1);
            c = c.wrapping_mul(K1);
            d ^= c;
            s += 16;
            if remaining <= 16 {
                break;
            }
            remaining -= 16;
        }
    }
    a = hash_len16(a, c);
    b = hash_len16(d, b);
    (a ^ b, hash_len16(b, a))
}

fn hash_len0_to16(data: &[u8]) -> u64 {
    let len = data.len();
    if len > 8 {
        let a = fetch64(data, 0);
        let b = fetch64(data, len - 8);
        #[allow(clippy::cast_possible_truncation)]
        let shift = len as u32;
        return hash_len16(a, b.wrapping_add(len as u64).rotate_right(shift)) ^ b;
    }
    if len >= 4 {
        let a = u64::from(fetch32(data, 0));
        return hash_len16(
            (len as u64).wrapping_add(a << 3),
            u64::from(fetch32(data, len - 4)),
        );
    }
    if len > 0 {
        let a = data[0];
        let b = data[len >> 1];
        let c = data[len - 1];
        let y = u32::from(a) + (u32::from(b) << 8);
        #[allow(clippy::cast_possible_truncation)]
        let z = len as u32 + (u32::from(c) << 2);
        return shift_mix(u64::from(y).wrapping_mul(K2) ^ u64::from(z).wrapping_mul(K3))
            .wrapping_mul(K2);
    }
    K2
}

fn weak_hash_len32_with_seeds(data: &[u8], offset: usize, a: u64, b: u64) -> (u64, u64) {
    let w = fetch64(data, offset);
    let x = fetch64(data, offset + 8);
    let y = fetch64(data, offset + 16);
    let z = fetch64(data, offset + 24);
    let mut a = a.wrapping_add(w);
    let mut b = rotate(b.wrapping_add(a).wrapping_add(z), 21);
    let c = a;
    a = a.wrapping_add(x).wrapping_add(y);
    b = b.wrapping_add(rotate(a, 44));
    (a.wrapping_add(z), b.wrapping_add(c))
}

fn hash_len16(u: u64, v: u64) -> u64 {
    let mut a = (u ^ v).wrapping_mul(K_MUL);
    a ^= a >> 47;
    let mut b = (v ^ a).wrapping_mul(K_MUL);
    b ^= b >> 47;
    b.wrapping_mul(K_MUL)
}

const fn shift_mix(value: u64) -> u64 {
    value ^ (value >> 47)
}

const fn rotate(value: u64, shift: u32) -> u64 {
    value.rotate_right(shift)
}

fn fetch64(data: &[u8], offset: usize) -> u64 {
    let mut word = [0_u8; 8];
    word.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(word)
}

fn fetch32(data: &[u8], offset: usize) -> u32 {
    let mut word = [0_u8; 4];
    word.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(word)
}

//! Squared Euclidean distance kernel.
//!
//! The engine orders candidates by L2² only, so the square root is never
//! taken. Provides NEON (aarch64) and AVX2+FMA (x86_64) implementations
//! with a scalar fallback on unsupported platforms or when AVX2 is
//! unavailable at runtime. SIMD variants accumulate in independent lanes,
//! so the reduction order differs from the scalar loop by at most rounding.

/// Squared Euclidean distance between two f32 slices.
///
/// Both slices must have the same length; the engine only calls this with
/// equal-length vectors.
#[inline]
#[allow(unreachable_code)]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must share a dimension");
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_l2_squared(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_l2_squared(a, b) };
        }
    }
    scalar_l2_squared(a, b)
}

fn scalar_l2_squared(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for i in 0..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

#[cfg(target_arch = "aarch64")]
unsafe fn neon_l2_squared(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);
    let mut s2 = vdupq_n_f32(0.0);
    let mut s3 = vdupq_n_f32(0.0);

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let d0 = vsubq_f32(vld1q_f32(a_ptr.add(base)), vld1q_f32(b_ptr.add(base)));
        let d1 = vsubq_f32(
            vld1q_f32(a_ptr.add(base + 4)),
            vld1q_f32(b_ptr.add(base + 4)),
        );
        let d2 = vsubq_f32(
            vld1q_f32(a_ptr.add(base + 8)),
            vld1q_f32(b_ptr.add(base + 8)),
        );
        let d3 = vsubq_f32(
            vld1q_f32(a_ptr.add(base + 12)),
            vld1q_f32(b_ptr.add(base + 12)),
        );
        s0 = vfmaq_f32(s0, d0, d0);
        s1 = vfmaq_f32(s1, d1, d1);
        s2 = vfmaq_f32(s2, d2, d2);
        s3 = vfmaq_f32(s3, d3, d3);
    }

    let mut sum = vaddvq_f32(vaddq_f32(vaddq_f32(s0, s1), vaddq_f32(s2, s3)));

    for i in (chunks * 16)..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Horizontal sum of 8 f32 values in a __m256 register.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn hsum_f32x8(v: __m256) -> f32 {
    let hi128 = _mm256_extractf128_ps(v, 1);
    let lo128 = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo128, hi128);
    let hi64 = _mm_movehl_ps(sum128, sum128);
    let sum64 = _mm_add_ps(sum128, hi64);
    let hi32 = _mm_shuffle_ps(sum64, sum64, 0x55);
    _mm_cvtss_f32(_mm_add_ss(sum64, hi32))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_l2_squared(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let d0 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
        );
        let d1 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base + 8)),
            _mm256_loadu_ps(b_ptr.add(base + 8)),
        );
        s0 = _mm256_fmadd_ps(d0, d0, s0);
        s1 = _mm256_fmadd_ps(d1, d1, s1);
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));

    for i in (chunks * 16)..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        sum += d * d;
    }
    sum
}

use rand::distributions::Uniform;
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;

use crate::portfolio::WeightVector;

/// Dedicated generator for one independent unit of work (a combination, a
/// GA generation...). The same `(seed, stream)` always yields the same
/// draws, whichever thread runs it.
pub fn stream_rng(seed: u64, stream: u64) -> ChaCha20Rng {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Packs a phase tag (8 bits), a portfolio size (16 bits) and a position
/// (40 bits) into one stream id.
pub fn stream_id(phase: u64, k: usize, position: u64) -> u64 {
    (phase << 56) | ((k as u64 & 0xffff) << 40) | (position & 0xff_ffff_ffff)
}

/// Draws weight vectors by normalizing `k` independent U(0, 1) values.
#[derive(Debug, Clone)]
pub struct WeightSampler {
    uniform: Uniform<f64>,
}

impl Default for WeightSampler {
    fn default() -> Self {
        WeightSampler {
            uniform: Uniform::new(0., 1.),
        }
    }
}

impl WeightSampler {
    pub fn sample<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> WeightVector {
        if k == 1 {
            return WeightVector::equal(1);
        }
        let raw = (0..k)
            .map(|_| self.uniform.sample(rng))
            .collect::<Vec<f64>>();
        WeightVector::normalized(raw)
    }
}

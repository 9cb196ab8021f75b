use std::sync::atomic::{AtomicU64, Ordering};

use crate::geometry::{Fp, Vec2f};
use crate::spectrum::Spectrum;

/// One traced path as reported to the film.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraSample {
    pub film_position: Vec2f,
    pub spectrum: Spectrum,
    pub hit: bool,
    pub bvh_traversals: usize,
}

pub trait Film: Send + Sync {
    fn register_sample(&self, sample: &CameraSample);
}

/// `f64` that can be added to from many threads, stored as bits in an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(v: Fp) -> Self {
        Self {
            bits: AtomicU64::new(v.to_bits()),
        }
    }

    pub fn add(&self, v: Fp) {
        let mut old_bits = self.bits.load(Ordering::Relaxed);
        loop {
            let new_bits = (Fp::from_bits(old_bits) + v).to_bits();
            match self.bits.compare_exchange_weak(
                old_bits,
                new_bits,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => old_bits = x,
            }
        }
    }

    pub fn load(&self) -> Fp {
        Fp::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default)]
struct PixelCell {
    sum: [AtomicF64; 3],
    samples: AtomicU64,
    hits: AtomicU64,
    traversals: AtomicU64,
}

/// Per-pixel running sums. Concurrent workers add atomically, so no sample is lost.
#[derive(Debug)]
pub struct Accumulator {
    width: usize,
    height: usize,
    pixels: Vec<PixelCell>,
}

impl Accumulator {
    pub fn new(width: usize, height: usize) -> Accumulator {
        Accumulator {
            width,
            height,
            pixels: (0..width * height).map(|_| PixelCell::default()).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn pixel_index(&self, film_position: &Vec2f) -> usize {
        let x = ((film_position.x * self.width as Fp) as usize).min(self.width - 1);
        let y = ((film_position.y * self.height as Fp) as usize).min(self.height - 1);
        y * self.width + x
    }

    pub fn pixel_average(&self, x: usize, y: usize) -> Spectrum {
        let cell = &self.pixels[y * self.width + x];
        let count = cell.samples.load(Ordering::Acquire);
        if count == 0 {
            return Spectrum::zeros();
        }
        Spectrum::new(cell.sum[0].load(), cell.sum[1].load(), cell.sum[2].load()) / count as Fp
    }

    pub fn sample_count(&self, x: usize, y: usize) -> u64 {
        self.pixels[y * self.width + x].samples.load(Ordering::Acquire)
    }

    pub fn total_samples(&self) -> u64 {
        self.pixels
            .iter()
            .map(|cell| cell.samples.load(Ordering::Acquire))
            .sum()
    }

    pub fn hit_ratio(&self) -> Fp {
        let hits: u64 = self
            .pixels
            .iter()
            .map(|cell| cell.hits.load(Ordering::Acquire))
            .sum();
        hits as Fp / self.total_samples().max(1) as Fp
    }

    pub fn average_traversals(&self) -> Fp {
        let traversals: u64 = self
            .pixels
            .iter()
            .map(|cell| cell.traversals.load(Ordering::Acquire))
            .sum();
        traversals as Fp / self.total_samples().max(1) as Fp
    }

    /// Row-major RGB bytes, each channel clamped to `[0, 1]`.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.width * self.height * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                let color = self.pixel_average(x, y);
                for i in 0..3 {
                    result.push((color[i].clamp(0.0, 1.0) * 255.0).round() as u8);
                }
            }
        }
        result
    }
}

impl Film for Accumulator {
    fn register_sample(&self, sample: &CameraSample) {
        if self.pixels.is_empty() {
            return;
        }
        let cell = &self.pixels[self.pixel_index(&sample.film_position)];
        for i in 0..3 {
            cell.sum[i].add(sample.spectrum[i]);
        }
        cell.hits.fetch_add(sample.hit as u64, Ordering::Relaxed);
        cell.traversals
            .fetch_add(sample.bvh_traversals as u64, Ordering::Relaxed);
        cell.samples.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_adds_are_not_lost() {
        let value = Arc::new(AtomicF64::new(0.0));
        let handles = (0..8)
            .map(|_| {
                let value = value.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        value.add(0.5);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(value.load(), 40_000.0);
    }

    #[test]
    fn samples_land_in_their_pixel() {
        let film = Accumulator::new(4, 2);
        let sample = CameraSample {
            film_position: Vec2f::new(0.9, 0.1),
            spectrum: Spectrum::new(1.0, 2.0, 3.0),
            hit: true,
            bvh_traversals: 6,
        };
        film.register_sample(&sample);
        film.register_sample(&CameraSample {
            spectrum: Spectrum::new(3.0, 2.0, 1.0),
            hit: false,
            ..sample.clone()
        });
        assert_eq!(film.sample_count(3, 0), 2);
        assert_eq!(film.pixel_average(3, 0), Spectrum::new(2.0, 2.0, 2.0));
        assert_eq!(film.total_samples(), 2);
        assert_eq!(film.hit_ratio(), 0.5);
        assert_eq!(film.average_traversals(), 6.0);
        assert_eq!(film.to_rgb_bytes().len(), 4 * 2 * 3);
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, PartialOrd, Debug)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

impl Complex<f32> {
    pub fn norm_sqr(&self) -> f32 {
        self.re * self.re + self.im * self.im
    }
}

/// The type of baseband samples out of the streamer (`fc32`)
pub type ComplexFloat = Complex<f32>;

/// Flatten samples into interleaved `[re, im, re, im, ...]`
pub fn interleave(samples: &[ComplexFloat], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for s in samples {
        out.push(s.re);
        out.push(s.im);
    }
}

/// Inverse of [`interleave`], a trailing odd value is dropped
pub fn deinterleave(values: &[f32]) -> Vec<ComplexFloat> {
    values
        .chunks_exact(2)
        .map(|pair| ComplexFloat::new(pair[0], pair[1]))
        .collect()
}

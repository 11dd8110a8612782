//! Dominant-frequency extraction from fixed PCM windows
//!
//! Audio is cut into windows of `L = input_samplerate / output_samplerate`
//! samples. Each window is transformed once and reduced to a single tone
//! byte: the frequency of the strongest bin above the threshold, divided
//! by 16, or 0 when nothing qualifies or the result does not fit a byte.

use crate::error::{PipelineError, Result};
use crate::pipeline::Transform;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Real-input spectral transform of a fixed window length
pub trait SpectralTransform: Send {
    /// Window length the transform was planned for
    fn len(&self) -> usize;

    /// Spectrum of `window`, DC bin first. Only bins up to the Nyquist bin
    /// need to be returned, the rest being their conjugate mirror.
    fn spectrum(&mut self, window: &[i16]) -> Result<&[Complex<f64>]>;
}

/// `realfft` forward transform, planned once and reused for every window
pub struct RealFftTransform {
    fft: Arc<dyn RealToComplex<f64>>,
    input: Vec<f64>,
    output: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl RealFftTransform {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(PipelineError::resource("cannot plan an empty transform"));
        }
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(len);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        Ok(Self {
            fft,
            input,
            output,
            scratch,
        })
    }
}

impl SpectralTransform for RealFftTransform {
    fn len(&self) -> usize {
        self.input.len()
    }

    fn spectrum(&mut self, window: &[i16]) -> Result<&[Complex<f64>]> {
        if window.len() != self.input.len() {
            return Err(PipelineError::resource(format!(
                "window of {} samples given to a {}-point transform",
                window.len(),
                self.input.len()
            )));
        }
        for (dst, &sample) in self.input.iter_mut().zip(window) {
            *dst = sample as f64;
        }
        self.fft
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .map_err(|e| PipelineError::resource(format!("fft failed: {}", e)))?;
        Ok(&self.output)
    }
}

/// Window length for the given rates, rejecting combinations that cannot
/// produce at least one sample per window
pub fn window_len(input_samplerate: u32, output_samplerate: u32) -> Result<usize> {
    if input_samplerate == 0 {
        return Err(PipelineError::config("input sample rate must be positive"));
    }
    if output_samplerate == 0 {
        return Err(PipelineError::config("output sample rate must be positive"));
    }
    if output_samplerate > input_samplerate {
        return Err(PipelineError::config(format!(
            "output sample rate {} exceeds input sample rate {}",
            output_samplerate, input_samplerate
        )));
    }
    Ok((input_samplerate / output_samplerate) as usize)
}

/// Tone byte for the peak `bin` of a `len`-point window; bin 0 means no peak
pub fn peak_to_tone(bin: usize, input_samplerate: u32, len: usize) -> u8 {
    if bin == 0 || len == 0 {
        return 0;
    }
    let freq = bin as u64 * input_samplerate as u64 / len as u64;
    u8::try_from(freq >> 4).unwrap_or(0)
}

pub struct SpectralPeakExtractor<T: SpectralTransform = RealFftTransform> {
    input_samplerate: u32,
    window_len: usize,
    threshold: f64,
    transform: T,
}

impl SpectralPeakExtractor<RealFftTransform> {
    pub fn new(input_samplerate: u32, output_samplerate: u32, threshold: f64) -> Result<Self> {
        let len = window_len(input_samplerate, output_samplerate)?;
        let transform = RealFftTransform::new(len)?;
        Self::with_transform(input_samplerate, output_samplerate, threshold, transform)
    }
}

impl<T: SpectralTransform> SpectralPeakExtractor<T> {
    pub fn with_transform(
        input_samplerate: u32,
        output_samplerate: u32,
        threshold: f64,
        transform: T,
    ) -> Result<Self> {
        let len = window_len(input_samplerate, output_samplerate)?;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(PipelineError::config(format!(
                "spectral threshold {} must be a non-negative number",
                threshold
            )));
        }
        if transform.len() != len {
            return Err(PipelineError::config(format!(
                "transform length {} does not match window length {}",
                transform.len(),
                len
            )));
        }
        Ok(Self {
            input_samplerate,
            window_len: len,
            threshold,
            transform,
        })
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Index of the strongest non-DC bin above the threshold
    pub fn peak_bin(&mut self, window: &[i16]) -> Result<Option<usize>> {
        let spectrum = self.transform.spectrum(window)?;

        let mut peak = None;
        let mut peak_magnitude = 0.0f64;
        for (bin, c) in spectrum.iter().enumerate().skip(1) {
            let magnitude = (c.re * c.re + c.im * c.im).sqrt();
            if magnitude > peak_magnitude && magnitude > self.threshold {
                peak_magnitude = magnitude;
                peak = Some(bin);
            }
        }
        Ok(peak)
    }

    pub fn tone(&mut self, window: &[i16]) -> Result<u8> {
        let bin = self.peak_bin(window)?.unwrap_or(0);
        Ok(peak_to_tone(bin, self.input_samplerate, self.window_len))
    }
}

impl<T: SpectralTransform> Transform for SpectralPeakExtractor<T> {
    type Input = i16;
    type Output = u8;

    fn unit_len(&self) -> usize {
        self.window_len
    }

    fn apply(&mut self, unit: &[i16], out: &mut Vec<u8>) -> Result<()> {
        let tone = self.tone(unit)?;
        out.push(tone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, sample_rate: u32, len: usize, amplitude: f64) -> Vec<i16> {
        (0..len)
            .map(|n| (amplitude * (2.0 * PI * freq * n as f64 / sample_rate as f64).sin()) as i16)
            .collect()
    }

    #[test]
    fn test_window_len_truncates() {
        assert_eq!(window_len(48000, 30).unwrap(), 1600);
        assert_eq!(window_len(44100, 30).unwrap(), 1470);
        assert_eq!(window_len(44100, 24).unwrap(), 1837);
        assert_eq!(window_len(8, 8).unwrap(), 1);
    }

    #[test]
    fn test_invalid_rates() {
        assert!(window_len(0, 30).unwrap_err().is_config());
        assert!(window_len(48000, 0).unwrap_err().is_config());
        assert!(window_len(20, 30).unwrap_err().is_config());
        for threshold in [-1.0, f64::NAN, f64::INFINITY] {
            let result = SpectralPeakExtractor::new(48000, 30, threshold);
            assert!(matches!(result, Err(ref e) if e.is_config()));
        }
    }

    #[test]
    fn test_peak_to_tone() {
        assert_eq!(peak_to_tone(0, 48000, 1600), 0);
        assert_eq!(peak_to_tone(40, 48000, 1600), 75);
        // 4095 Hz >> 4 = 255 still fits
        assert_eq!(peak_to_tone(4095, 1000, 1000), 255);
        // 4096 Hz >> 4 = 256 does not
        assert_eq!(peak_to_tone(4096, 1000, 1000), 0);
    }

    #[test]
    fn test_pure_sine_tone() {
        // 30 Hz bins: 1200 Hz sits exactly on bin 40
        let mut extractor = SpectralPeakExtractor::new(48000, 30, 1000.0).unwrap();
        assert_eq!(extractor.window_len(), 1600);

        let window = sine(1200.0, 48000, 1600, 10000.0);
        assert_eq!(extractor.peak_bin(&window).unwrap(), Some(40));
        assert_eq!(extractor.tone(&window).unwrap(), (1200u32 >> 4) as u8);
    }

    #[test]
    fn test_below_threshold_is_zero() {
        let mut extractor = SpectralPeakExtractor::new(48000, 30, 1.0e12).unwrap();
        let window = sine(1200.0, 48000, 1600, 10000.0);
        assert_eq!(extractor.peak_bin(&window).unwrap(), None);
        assert_eq!(extractor.tone(&window).unwrap(), 0);
    }

    #[test]
    fn test_silence_is_zero() {
        let mut extractor = SpectralPeakExtractor::new(48000, 30, 0.0).unwrap();
        assert_eq!(extractor.tone(&[0i16; 1600]).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_tone_is_zero() {
        // 6000 Hz >> 4 = 375
        let mut extractor = SpectralPeakExtractor::new(48000, 30, 1000.0).unwrap();
        let window = sine(6000.0, 48000, 1600, 10000.0);
        assert_eq!(extractor.peak_bin(&window).unwrap(), Some(200));
        assert_eq!(extractor.tone(&window).unwrap(), 0);
    }

    #[test]
    fn test_dc_offset_ignored() {
        let mut extractor = SpectralPeakExtractor::new(48000, 30, 1000.0).unwrap();
        let window: Vec<i16> = sine(600.0, 48000, 1600, 2000.0)
            .into_iter()
            .map(|s| s + 20000)
            .collect();
        assert_eq!(extractor.peak_bin(&window).unwrap(), Some(20));
    }

    #[test]
    fn test_transform_emits_one_byte_per_window() {
        let mut extractor = SpectralPeakExtractor::new(48000, 30, 1000.0).unwrap();
        let mut out = Vec::new();
        extractor
            .apply(&sine(1200.0, 48000, 1600, 10000.0), &mut out)
            .unwrap();
        extractor.apply(&[0i16; 1600], &mut out).unwrap();
        assert_eq!(out, vec![75, 0]);

        assert!(extractor.apply(&[0i16; 10], &mut out).is_err());
    }

    #[test]
    fn test_mismatched_transform_rejected() {
        let transform = RealFftTransform::new(100).unwrap();
        let result = SpectralPeakExtractor::with_transform(48000, 30, 0.0, transform);
        assert!(matches!(result, Err(ref e) if e.is_config()));
    }
}

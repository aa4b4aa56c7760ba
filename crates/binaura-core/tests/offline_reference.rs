//! Block-wise rendering against a double-precision whole-signal reference

mod common;

use binaura_core::config::EngineConfig;
use binaura_core::engine::EngineContext;
use binaura_core::preset::{preset_id_for, HrirData};
use binaura_core::renderer::{build_renderer, render_offline, StereoSignal};
use common::{drain, init_logging, render, selection, virtual_hal, write_wav};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realfft::RealFftPlanner;
use tempfile::TempDir;

const RATE: u32 = 48000;
const BLOCK: usize = 512;
const TAPS: usize = 8192;

/// Paul Kellet's economy pink filter over seeded white noise
fn pink_noise(rng: &mut StdRng, len: usize) -> Vec<f32> {
    let (mut b0, mut b1, mut b2) = (0.0f64, 0.0f64, 0.0f64);
    (0..len)
        .map(|_| {
            let white: f64 = rng.gen_range(-1.0..1.0);
            b0 = 0.99765 * b0 + white * 0.0990460;
            b1 = 0.96300 * b1 + white * 0.2965164;
            b2 = 0.57000 * b2 + white * 1.0526913;
            ((b0 + b1 + b2 + white * 0.1848) * 0.05) as f32
        })
        .collect()
}

/// Exponentially decaying noise burst standing in for a measured response
fn decaying_response(rng: &mut StdRng) -> Vec<f32> {
    let time_constant = TAPS as f64 / 6.0;
    (0..TAPS)
        .map(|n| {
            let noise: f64 = rng.gen_range(-1.0..1.0);
            (0.5 * noise * (-(n as f64) / time_constant).exp()) as f32
        })
        .collect()
}

/// Linear convolution in f64 via one large FFT
fn reference(signal: &[f32], response: &[f32]) -> Vec<f64> {
    let len = signal.len() + response.len() - 1;
    let n = len.next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let spectrum = |samples: &[f32]| {
        let mut padded = vec![0.0f64; n];
        for (dst, src) in padded.iter_mut().zip(samples) {
            *dst = *src as f64;
        }
        let mut out = forward.make_output_vec();
        forward.process(&mut padded, &mut out).unwrap();
        out
    };

    let mut product = spectrum(signal);
    for (a, b) in product.iter_mut().zip(spectrum(response)) {
        *a *= b;
    }
    let last = product.len() - 1;
    product[0].im = 0.0;
    product[last].im = 0.0;

    let mut result = inverse.make_output_vec();
    inverse.process(&mut product, &mut result).unwrap();
    result.truncate(len);
    let scale = 1.0 / n as f64;
    result.iter_mut().for_each(|v| *v *= scale);
    result
}

fn sum(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Peak error relative to the reference peak, in dB
fn error_db(rendered: &[f32], expected: &[f64]) -> f64 {
    let peak = expected.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let error = rendered
        .iter()
        .zip(expected)
        .fold(0.0f64, |m, (r, e)| m.max((*r as f64 - e).abs()));
    20.0 * (error / peak).log10()
}

struct Scenario {
    left: Vec<f32>,
    right: Vec<f32>,
    hrir: HrirData,
}

fn scenario(seconds: usize) -> Scenario {
    let mut rng = StdRng::seed_from_u64(0x5eed_b1a0);
    let left = pink_noise(&mut rng, seconds * RATE as usize);
    let right = pink_noise(&mut rng, seconds * RATE as usize);
    let hrir = HrirData {
        channels: vec![decaying_response(&mut rng), decaying_response(&mut rng)],
        sample_rate: RATE,
    };
    Scenario { left, right, hrir }
}

fn render_scenario(scenario: &Scenario) -> StereoSignal {
    let mut renderer = build_renderer(&scenario.hrir, 2, BLOCK, RATE).unwrap();
    render_offline(&mut renderer, &[scenario.left.clone(), scenario.right.clone()])
}

#[test]
fn test_pink_noise_matches_double_precision_reference() {
    let scenario = scenario(10);
    let rendered = render_scenario(&scenario);

    // Symmetric pair: near ear uses channel 0, far ear channel 1
    let (near, far) = (&scenario.hrir.channels[0], &scenario.hrir.channels[1]);
    let expected_left = sum(&reference(&scenario.left, near), &reference(&scenario.right, far));
    let expected_right = sum(&reference(&scenario.left, far), &reference(&scenario.right, near));

    assert_eq!(rendered.left.len(), scenario.left.len() + TAPS - 1);
    assert_eq!(rendered.left.len(), expected_left.len());

    let left_db = error_db(&rendered.left, &expected_left);
    let right_db = error_db(&rendered.right, &expected_right);
    assert!(left_db < -80.0, "left error {:.1} dB", left_db);
    assert!(right_db < -80.0, "right error {:.1} dB", right_db);
}

#[test]
fn test_rendering_is_deterministic() {
    let scenario = scenario(1);
    let first = render_scenario(&scenario);
    let second = render_scenario(&scenario);
    assert_eq!(first, second);

    // Reusing a renderer gives the same result as a fresh one
    let mut renderer = build_renderer(&scenario.hrir, 2, BLOCK, RATE).unwrap();
    let input = [scenario.left.clone(), scenario.right.clone()];
    let warm = render_offline(&mut renderer, &input);
    let again = render_offline(&mut renderer, &input);
    assert_eq!(warm, again);
    assert_eq!(warm, first);
}

#[test]
fn test_live_pipeline_matches_offline_render() {
    init_logging();
    let scenario = scenario(1);
    let presets = TempDir::new().unwrap();
    let path = write_wav(presets.path(), "reference.wav", &scenario.hrir.channels, RATE);

    let hal = virtual_hal(false);
    let config = EngineConfig::default().with_preset_dir(presets.path());
    assert_eq!(config.block_frames(), BLOCK);
    let mut ctx = EngineContext::new(hal.clone(), config);
    ctx.restore(&selection()).unwrap();
    ctx.activate_preset(preset_id_for(&path)).unwrap();
    ctx.start().unwrap();
    drain(&ctx.events());

    let blocks = 40;
    let mut live_left = Vec::with_capacity(blocks * BLOCK);
    let mut live_right = Vec::with_capacity(blocks * BLOCK);
    for b in 0..blocks {
        let span = b * BLOCK..(b + 1) * BLOCK;
        let output = render(&hal, &scenario.left[span.clone()], &scenario.right[span]);
        live_left.extend_from_slice(output.channel(0));
        live_right.extend_from_slice(output.channel(1));
    }

    let offline = render_scenario(&scenario);
    for (live, offline) in [(&live_left, &offline.left), (&live_right, &offline.right)] {
        for (a, b) in live.iter().zip(offline.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }
    assert_eq!(ctx.status().stats.silent_blocks, 0);
}

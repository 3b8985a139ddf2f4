use echo_fdnlms::{EchoCanceller, FRAME_SIZE, HALF_FRAME};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SAMPLE_RATE: f32 = 16000.0;

fn rms(samples: &[i16]) -> f32 {
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// White noise under a slow syllable-like envelope.
fn speech_like_noise(rng: &mut StdRng, len: usize, peak: f32) -> Vec<i16> {
    (0..len)
        .map(|n| {
            let phase = std::f32::consts::PI * n as f32 / 4000.0;
            let envelope = 0.2 + 0.8 * phase.sin().powi(2);
            (peak * envelope * rng.random_range(-1.0f32..1.0)) as i16
        })
        .collect()
}

fn delayed_echo(far: &[i16], delay: usize, gain: f32) -> Vec<i16> {
    (0..far.len())
        .map(|n| match n.checked_sub(delay) {
            Some(src) => (gain * f32::from(far[src])) as i16,
            None => 0,
        })
        .collect()
}

#[test]
fn pure_echo_is_attenuated() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let far = speech_like_noise(&mut rng, 96_000, 8000.0);
    let near = delayed_echo(&far, 40, 0.5);

    let mut aec = EchoCanceller::new(256, SAMPLE_RATE).unwrap();
    let mut out = vec![0i16; far.len()];
    aec.process_block(&far, &near, &mut out);

    let tail_start = far.len() * 9 / 10;
    let residual = rms(&out[tail_start..]);
    let echo = rms(&near[tail_start..]);
    assert!(
        residual < 0.05 * echo,
        "residual {residual} vs echo {echo} (mju {}, eit {}, errors {})",
        aec.mju(),
        aec.eit(),
        aec.error_count()
    );
}

#[test]
fn silence_stays_silent() {
    let tail = 128;
    let mut aec = EchoCanceller::new(tail, SAMPLE_RATE).unwrap();
    let initial_mju = aec.mju();

    for _ in 0..tail + FRAME_SIZE {
        assert_eq!(aec.process(0, 0), 0);
    }
    assert_eq!(aec.mju(), initial_mju);
    assert!((initial_mju - 0.25).abs() < 1e-5);
    assert_eq!(aec.error_count(), 0);
    assert!(!aec.is_warmed_up());
    assert!(aec.weights().iter().all(|&w| w == 0.0));
}

#[test]
fn far_end_surge_forces_restart_with_far_end_output() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut aec = EchoCanceller::new(64, SAMPLE_RATE).unwrap();

    // A faint far-end with a loud echo drives the taps far above unity.
    let training: Vec<i16> = (0..4 * HALF_FRAME)
        .map(|_| rng.random_range(-100i16..=100))
        .collect();
    let near = delayed_echo(&training, 10, 160.0);
    for (&x, &d) in training.iter().zip(&near) {
        aec.process(x, d);
    }
    assert_eq!(aec.error_count(), 0);
    assert!(aec.weights().iter().any(|w| w.abs() > 1.0));

    let mut restarted = false;
    for _ in 0..4 * HALF_FRAME {
        let far = rng.random_range(-30000i16..=30000);
        let out = aec.process(far, 0);
        if aec.just_restarted() {
            // The restart passes the raw far-end sample through.
            assert_eq!(out, far);
            assert_eq!(aec.error_count(), 0);
            assert!(aec.weights().iter().all(|&w| w == 0.0));
            restarted = true;
            break;
        }
    }
    assert!(restarted, "surge never triggered a restart");

    aec.process(0, 0);
    assert!(!aec.just_restarted());
}

#[test]
fn identical_input_gives_identical_output() {
    let mut rng = StdRng::seed_from_u64(7);
    let far = speech_like_noise(&mut rng, 8 * FRAME_SIZE, 6000.0);
    let near = delayed_echo(&far, 25, 0.4);

    let mut first = EchoCanceller::new(128, SAMPLE_RATE).unwrap();
    let mut second = EchoCanceller::new(128, SAMPLE_RATE).unwrap();
    for (&x, &d) in far.iter().zip(&near) {
        assert_eq!(first.process(x, d), second.process(x, d));
    }
    assert_eq!(first.mju().to_bits(), second.mju().to_bits());
    assert_eq!(first.eit().to_bits(), second.eit().to_bits());
}

#[test]
fn manual_reset_restores_initial_state() {
    let mut rng = StdRng::seed_from_u64(3);
    let far = speech_like_noise(&mut rng, 6 * FRAME_SIZE, 6000.0);
    let near = delayed_echo(&far, 12, 0.5);

    let mut aec = EchoCanceller::new(64, SAMPLE_RATE).unwrap();
    let mut out = vec![0i16; far.len()];
    aec.process_block(&far, &near, &mut out);

    aec.reset();
    assert!(aec.just_restarted());
    assert_eq!(aec.total_samples(), 0);
    assert_eq!(aec.eit(), 0.0);
    assert!(!aec.is_warmed_up());
    assert!((aec.mju() - 0.25).abs() < 1e-5);
    assert!(aec.weights().iter().all(|&w| w == 0.0));
}

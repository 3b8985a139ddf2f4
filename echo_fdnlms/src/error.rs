use thiserror::Error;

pub type AecResult<T> = Result<T, AecError>;

#[derive(Error, Debug)]
pub enum AecError {
    #[error("tail length must be at least one sample")]
    EmptyTail,

    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(f32),

    #[error("invalid band-pass range: {low} Hz .. {high} Hz")]
    InvalidBand { low: f32, high: f32 },

    #[error("invalid step-size cap: {0}")]
    InvalidStepCap(f32),

    #[error("restart threshold must be at least one error")]
    ZeroRestartThreshold,

    #[error("spectral transform failed: {0}")]
    Transform(#[from] realfft::FftError),
}

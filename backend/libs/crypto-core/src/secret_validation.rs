//! Strength checks for HS256 signing secrets.
//!
//! A secret is rejected when it is short, low in entropy, built from runs of
//! repeated or sequential characters, or looks like a placeholder copied from
//! a sample `.env` file.

const MIN_SECRET_LENGTH: usize = 32;
const RECOMMENDED_SECRET_LENGTH: usize = 64;
const MIN_ENTROPY_BITS: f64 = 4.0;
const STRONG_ENTROPY_BITS: f64 = 5.0;
const MAX_RUN: usize = 4;

const PLACEHOLDER_MARKERS: &[&str] = &[
    "changeme",
    "change-me",
    "change_me",
    "your-secret",
    "your_secret",
    "replace-me",
    "placeholder",
    "example",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStrength {
    Acceptable,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakSecretReason {
    TooShort,
    LowEntropy,
    RepeatingOrSequential,
    Placeholder,
}

impl WeakSecretReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::TooShort => "secret must be at least 32 bytes",
            Self::LowEntropy => "secret has too little entropy",
            Self::RepeatingOrSequential => "secret contains repeated or sequential runs",
            Self::Placeholder => "secret looks like a placeholder value",
        }
    }
}

/// Classify a secret, returning the first reason it is weak if any.
pub fn assess_secret(secret: &str) -> Result<SecretStrength, WeakSecretReason> {
    let bytes = secret.as_bytes();
    if bytes.len() < MIN_SECRET_LENGTH {
        return Err(WeakSecretReason::TooShort);
    }

    let lowered = secret.to_ascii_lowercase();
    if PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Err(WeakSecretReason::Placeholder);
    }

    let entropy = shannon_entropy(bytes);
    if entropy < MIN_ENTROPY_BITS {
        return Err(WeakSecretReason::LowEntropy);
    }

    if longest_run(bytes, |a, b| a == b) >= MAX_RUN
        || longest_run(bytes, |a, b| b as i16 - a as i16 == 1)
            >= MAX_RUN
    {
        return Err(WeakSecretReason::RepeatingOrSequential);
    }

    if bytes.len() >= RECOMMENDED_SECRET_LENGTH && entropy >= STRONG_ENTROPY_BITS {
        Ok(SecretStrength::Strong)
    } else {
        Ok(SecretStrength::Acceptable)
    }
}

/// Bits per byte, 0..=8.
fn shannon_entropy(data: &[u8]) -> f64 {
    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }
    let len = data.len() as f64;
    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn longest_run(data: &[u8], continues: impl Fn(u8, u8) -> bool) -> usize {
    let mut longest = usize::from(!data.is_empty());
    let mut current = longest;
    for pair in data.windows(2) {
        if continues(pair[0], pair[1]) {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 1;
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_secret_is_weak() {
        assert_eq!(assess_secret("short"), Err(WeakSecretReason::TooShort));
    }

    #[test]
    fn test_low_entropy_secret_is_weak() {
        let secret = "abababababababababababababababab";
        assert_eq!(assess_secret(secret), Err(WeakSecretReason::LowEntropy));
    }

    #[test]
    fn test_runs_are_weak() {
        assert_eq!(
            assess_secret("Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@Nb6^Hd5%aaaa"),
            Err(WeakSecretReason::RepeatingOrSequential)
        );
        assert_eq!(
            assess_secret("Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@Nb6^Hd5%1234"),
            Err(WeakSecretReason::RepeatingOrSequential)
        );
    }

    #[test]
    fn test_placeholder_is_weak() {
        assert_eq!(
            assess_secret("your-secret-key-Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@"),
            Err(WeakSecretReason::Placeholder)
        );
    }

    #[test]
    fn test_acceptable_and_strong() {
        assert_eq!(
            assess_secret("Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@Nb6^Hd5%"),
            Ok(SecretStrength::Acceptable)
        );
        let long = "Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@Nb6^Hd5%Jf1(Gs0)Uc-=Ea+_Zo[]Yi{}Wu;:Tr<>";
        assert_eq!(assess_secret(long), Ok(SecretStrength::Strong));
    }
}

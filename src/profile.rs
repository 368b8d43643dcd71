use rand::Rng;

use crate::keywords::KeywordSet;
use crate::types::{ProfileClass, TargetProfile};

const HEAVY: TargetProfile = TargetProfile {
    class: ProfileClass::Heavy,
    base_cpu_cores: 8,
    base_ram_gb: 16,
    base_disk_gb: 250,
    base_daily_traffic: 150_000,
};

const STATIC: TargetProfile = TargetProfile {
    class: ProfileClass::Static,
    base_cpu_cores: 1,
    base_ram_gb: 1,
    base_disk_gb: 10,
    base_daily_traffic: 5_000,
};

/// The two tiers an unclassified target is assigned between.
const UNKNOWN_TIERS: [TargetProfile; 2] = [
    TargetProfile {
        class: ProfileClass::Unknown,
        base_cpu_cores: 2,
        base_ram_gb: 4,
        base_disk_gb: 40,
        base_daily_traffic: 20_000,
    },
    TargetProfile {
        class: ProfileClass::Unknown,
        base_cpu_cores: 4,
        base_ram_gb: 8,
        base_disk_gb: 80,
        base_daily_traffic: 50_000,
    },
];

/// Classify a target by case-sensitive substring containment. Heavy wins over static.
pub fn classify(target: &str, keywords: &KeywordSet) -> ProfileClass {
    if keywords.heavy.iter().any(|k| target.contains(k.as_str())) {
        ProfileClass::Heavy
    } else if keywords.static_sites.iter().any(|k| target.contains(k.as_str())) {
        ProfileClass::Static
    } else {
        ProfileClass::Unknown
    }
}

/// Derive the baseline profile for `target`.
///
/// Unknown targets consume exactly one coin flip from `rng`; classified targets consume none.
pub fn select_profile<R: Rng + ?Sized>(
    target: &str,
    keywords: &KeywordSet,
    rng: &mut R,
) -> TargetProfile {
    match classify(target, keywords) {
        ProfileClass::Heavy => HEAVY,
        ProfileClass::Static => STATIC,
        ProfileClass::Unknown => {
            if rng.random_bool(0.5) {
                UNKNOWN_TIERS[1]
            } else {
                UNKNOWN_TIERS[0]
            }
        }
    }
}

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;

const SUFFIX_LEN: usize = 4;

/// Issues `{building_id}-{4 alphanumerics}` ids, unique within one run.
#[derive(Debug, Default)]
pub struct ResidenceIds {
    issued: HashSet<String>,
}

impl ResidenceIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue<R: Rng>(&mut self, building_id: &str, rng: &mut R) -> String {
        loop {
            let suffix: String = (0..SUFFIX_LEN)
                .map(|_| rng.sample(Alphanumeric) as char)
                .collect();
            let id = format!("{}-{}", building_id, suffix);
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_format() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = ResidenceIds::new().issue("B12", &mut rng);
        let (building, suffix) = id.rsplit_once('-').unwrap();
        assert_eq!(building, "B12");
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ids = ResidenceIds::new();
        let issued: HashSet<String> = (0..2_000).map(|_| ids.issue("7", &mut rng)).collect();
        assert_eq!(issued.len(), 2_000);
        assert_eq!(ids.len(), 2_000);
    }

    #[test]
    fn test_same_seed_same_ids() {
        let a: Vec<String> = {
            let mut rng = StdRng::seed_from_u64(42);
            let mut ids = ResidenceIds::new();
            (0..5).map(|_| ids.issue("9", &mut rng)).collect()
        };
        let b: Vec<String> = {
            let mut rng = StdRng::seed_from_u64(42);
            let mut ids = ResidenceIds::new();
            (0..5).map(|_| ids.issue("9", &mut rng)).collect()
        };
        assert_eq!(a, b);
    }
}

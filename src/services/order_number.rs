use rand::Rng;

/// Prefix carried by every order number.
pub const ORDER_NUMBER_PREFIX: char = 'T';

const HEX_DIGITS: usize = 8;

/// Source of candidate order numbers. Candidates need not be unique; the order
/// service checks each one against the ledger before using it.
pub trait OrderNumberGenerator: Send + Sync {
    fn next_candidate(&self) -> String;
}

/// `T` followed by eight random uppercase hex digits.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomHexGenerator;

impl OrderNumberGenerator for RandomHexGenerator {
    fn next_candidate(&self) -> String {
        let value: u32 = rand::thread_rng().gen();
        format!("{ORDER_NUMBER_PREFIX}{value:08X}")
    }
}

/// Whether `number` has the shape of an order number.
pub fn is_well_formed(number: &str) -> bool {
    number
        .strip_prefix(ORDER_NUMBER_PREFIX)
        .map(|digits| {
            digits.len() == HEX_DIGITS
                && digits
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_numbers_are_well_formed() {
        let generator = RandomHexGenerator;
        for _ in 0..200 {
            let candidate = generator.next_candidate();
            assert!(is_well_formed(&candidate), "{candidate}");
        }
    }

    #[test]
    fn shape_check() {
        assert!(is_well_formed("T00ABCDEF"));
        assert!(!is_well_formed("T00abcdef"));
        assert!(!is_well_formed("X00ABCDEF"));
        assert!(!is_well_formed("T00ABCDE"));
        assert!(!is_well_formed("T00ABCDEFG"));
        assert!(!is_well_formed(""));
    }
}

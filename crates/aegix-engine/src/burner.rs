//! Ephemeral burner accounts: a keypair generated per payment, used for
//! exactly one transfer, then retired. After retirement only the address
//! survives for audit; the secret is dropped (and thereby zeroized).

use aegix_core::error::AegixError;
use aegix_core::payment::BurnerState;
use aegix_core::types::Address;
use aegix_crypto::keypair::KeyPair;

pub struct Burner {
    pub address: Address,
    pub state: BurnerState,
    keypair: Option<KeyPair>,
}

impl Burner {
    pub fn generate() -> Self {
        let keypair = KeyPair::generate();
        Self {
            address: keypair.address,
            state: BurnerState::Created,
            keypair: Some(keypair),
        }
    }

    /// The live keypair. Fails once the burner has been retired.
    pub fn keypair(&self) -> Result<&KeyPair, AegixError> {
        self.keypair
            .as_ref()
            .ok_or_else(|| AegixError::Other("burner already retired".to_string()))
    }

    pub fn mark(&mut self, state: BurnerState) {
        self.state = state;
    }

    /// Retire the burner: drop the secret (zeroized on drop), keep the
    /// address for the audit trail.
    pub fn retire(&mut self) {
        self.keypair = None;
        self.state = BurnerState::Recovered;
    }
}

impl std::fmt::Debug for Burner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Burner {{ address: {:?}, state: {:?} }}", self.address, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retirement_drops_the_secret_but_keeps_the_address() {
        let mut burner = Burner::generate();
        let address = burner.address;
        assert!(burner.keypair().is_ok());

        burner.retire();
        assert_eq!(burner.state, BurnerState::Recovered);
        assert_eq!(burner.address, address);
        assert!(burner.keypair().is_err());
    }
}

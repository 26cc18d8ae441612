//! Genesis configuration for a validator session.
//!
//! The genesis file fixes the participant set (order, keys, weights) and the
//! session options every participant must share.

use crate::description::Description;
use crate::error::{Result, SessionError};
use crate::options::SessionOptions;
use crate::participant::Participant;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tally_types::{Keypair, PublicKey, SignatureVerifier};

/// Genesis entry for one participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenesisParticipant {
    /// Human-readable name.
    pub name: String,

    /// Public key (hex-encoded).
    pub pubkey: String,

    /// Voting weight.
    pub weight: u64,
}

impl GenesisParticipant {
    /// Converts to a `Participant`.
    pub fn into_participant(self) -> Result<Participant> {
        let bytes =
            hex::decode(&self.pubkey).map_err(|e| SessionError::InvalidGenesis(e.to_string()))?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            SessionError::InvalidGenesis(format!(
                "invalid public key length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        if self.weight == 0 {
            return Err(SessionError::InvalidGenesis(format!(
                "participant {} has zero weight",
                self.name
            )));
        }
        Ok(Participant::new(
            PublicKey::from_bytes(bytes),
            self.name,
            self.weight,
        ))
    }
}

/// Complete genesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionGenesis {
    /// Session identifier.
    pub session_id: String,

    /// Participants, in session order.
    pub participants: Vec<GenesisParticipant>,

    /// Session options.
    #[serde(default)]
    pub options: SessionOptions,
}

impl SessionGenesis {
    /// Creates an empty genesis.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            participants: Vec::new(),
            options: SessionOptions::default(),
        }
    }

    /// Adds a participant.
    pub fn with_participant(mut self, participant: GenesisParticipant) -> Self {
        self.participants.push(participant);
        self
    }

    /// Sets the session options.
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Loads genesis from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let genesis: SessionGenesis = serde_json::from_str(&content)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Loads genesis from a YAML file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let genesis: SessionGenesis = serde_yaml::from_str(&content)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Saves genesis to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Saves genesis to a YAML file.
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validates the genesis configuration.
    pub fn validate(&self) -> Result<()> {
        if self.session_id.is_empty() {
            return Err(SessionError::InvalidGenesis("session_id is empty".into()));
        }
        if self.participants.is_empty() {
            return Err(SessionError::InvalidGenesis("no participants".into()));
        }
        if self.participants.len() < self.options.min_participants {
            return Err(SessionError::InvalidGenesis(format!(
                "need at least {} participants, got {}",
                self.options.min_participants,
                self.participants.len()
            )));
        }
        self.options.validate()?;

        let mut seen_names = HashSet::new();
        let mut seen_keys = HashSet::new();
        for p in &self.participants {
            let participant = p.clone().into_participant()?;
            if !seen_names.insert(&p.name) {
                return Err(SessionError::InvalidGenesis(format!(
                    "duplicate participant name: {}",
                    p.name
                )));
            }
            if !seen_keys.insert(participant.public_key) {
                return Err(SessionError::InvalidGenesis(format!(
                    "duplicate participant pubkey: {}",
                    p.pubkey
                )));
            }
        }
        Ok(())
    }

    /// Converts to the ordered participant list.
    pub fn into_participants(self) -> Result<Vec<Participant>> {
        self.participants
            .into_iter()
            .map(GenesisParticipant::into_participant)
            .collect()
    }

    /// Builds the session description.
    pub fn into_description(self, verifier: impl SignatureVerifier + 'static) -> Result<Description> {
        self.validate()?;
        let options = self.options.clone();
        Description::new(self.into_participants()?, options, verifier)
    }
}

/// Generates a devnet genesis whose keys derive from seeds `0..count`.
pub fn generate_devnet_genesis(count: usize) -> SessionGenesis {
    let participants = (0..count as u64)
        .map(|seed| GenesisParticipant {
            name: format!("node-{}", seed),
            pubkey: Keypair::from_seed(seed).public_key().to_hex(),
            weight: 1,
        })
        .collect();

    SessionGenesis {
        session_id: "tally-devnet".into(),
        participants,
        options: SessionOptions::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::Ed25519Verifier;

    #[test]
    fn test_genesis_validation() {
        let genesis = generate_devnet_genesis(4);
        assert!(genesis.validate().is_ok());
    }

    #[test]
    fn test_genesis_too_few_participants() {
        let mut genesis = generate_devnet_genesis(2);
        genesis.options.min_participants = 4;
        assert!(matches!(
            genesis.validate(),
            Err(SessionError::InvalidGenesis(_))
        ));
    }

    #[test]
    fn test_genesis_to_description() {
        let desc = generate_devnet_genesis(4)
            .into_description(Ed25519Verifier::new())
            .unwrap();
        assert_eq!(desc.total_nodes(), 4);
        assert_eq!(desc.cutoff_weight(), 3);
        assert_eq!(
            desc.public_key(2),
            Some(&Keypair::from_seed(2).public_key())
        );
    }

    #[test]
    fn test_genesis_duplicate_name() {
        let mut genesis = generate_devnet_genesis(4);
        genesis.participants[1].name = genesis.participants[0].name.clone();
        assert!(matches!(
            genesis.validate(),
            Err(SessionError::InvalidGenesis(msg)) if msg.contains("duplicate participant name")
        ));
    }

    #[test]
    fn test_genesis_duplicate_pubkey() {
        let mut genesis = generate_devnet_genesis(4);
        genesis.participants[1].pubkey = genesis.participants[0].pubkey.clone();
        assert!(matches!(
            genesis.validate(),
            Err(SessionError::InvalidGenesis(msg)) if msg.contains("duplicate participant pubkey")
        ));
    }

    #[test]
    fn test_genesis_bad_key() {
        let mut genesis = generate_devnet_genesis(4);
        genesis.participants[0].pubkey = "abcd".into();
        assert!(genesis.validate().is_err());
    }

    #[test]
    fn test_genesis_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        let genesis = generate_devnet_genesis(4);
        genesis.save_json(&path).unwrap();
        assert_eq!(SessionGenesis::load_json(&path).unwrap(), genesis);
    }

    #[test]
    fn test_genesis_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.yaml");
        let genesis = generate_devnet_genesis(5).with_options(SessionOptions {
            max_round_attempts: 2,
            ..Default::default()
        });
        genesis.save_yaml(&path).unwrap();
        let loaded = SessionGenesis::load_yaml(&path).unwrap();
        assert_eq!(loaded.options.max_round_attempts, 2);
        assert_eq!(loaded.participants.len(), 5);
    }
}

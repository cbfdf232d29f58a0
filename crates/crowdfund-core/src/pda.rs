//! Program-derived addresses.
//!
//! A program address is a hash of seeds and the owning program id that is
//! guaranteed to have no private key. The record lives at
//! `["campaign", authority]` and its vault at `["vault", campaign]`, so the
//! vault can only be computed once the campaign address is known.

use sha2::{Digest, Sha256};

use crate::error::CrowdfundError;
use crate::pubkey::Pubkey;

pub const MAX_SEEDS: usize = 16;
pub const MAX_SEED_LEN: usize = 32;
pub const PDA_MARKER: &[u8; 21] = b"ProgramDerivedAddress";

pub const CAMPAIGN_SEED: &[u8] = b"campaign";
pub const VAULT_SEED: &[u8] = b"vault";

const ON_CURVE: &str = "address on curve";

/// Deterministic seed-to-address derivation supplied by the host.
pub trait AddressDeriver {
    /// Derive the address for `seeds` (bump included, if any) under
    /// `program_id`.
    fn create_program_address(
        &self,
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<Pubkey, CrowdfundError>;

    /// Search bumps from 255 down and return the first valid address along
    /// with the bump that produced it.
    fn find_program_address(
        &self,
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), CrowdfundError> {
        if seeds.len() >= MAX_SEEDS {
            return Err(CrowdfundError::InvalidSeeds("too many seeds"));
        }
        for bump in (0..=u8::MAX).rev() {
            let bump_seed = [bump];
            let mut with_bump: Vec<&[u8]> = seeds.to_vec();
            with_bump.push(&bump_seed);
            match self.create_program_address(&with_bump, program_id) {
                Ok(address) => return Ok((address, bump)),
                Err(CrowdfundError::InvalidSeeds(ON_CURVE)) => {}
                Err(other) => return Err(other),
            }
        }
        Err(CrowdfundError::InvalidSeeds("no viable bump"))
    }
}

/// The host's derivation: SHA-256 of seeds, program id and the PDA marker,
/// rejecting results that are valid ed25519 points.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Deriver;

impl AddressDeriver for Sha256Deriver {
    fn create_program_address(
        &self,
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<Pubkey, CrowdfundError> {
        if seeds.len() > MAX_SEEDS {
            return Err(CrowdfundError::InvalidSeeds("too many seeds"));
        }
        if seeds.iter().any(|seed| seed.len() > MAX_SEED_LEN) {
            return Err(CrowdfundError::InvalidSeeds("max seed length exceeded"));
        }
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update(program_id.as_ref());
        hasher.update(PDA_MARKER);
        let address = Pubkey::new_from_array(hasher.finalize().into());
        if address.is_on_curve() {
            return Err(CrowdfundError::InvalidSeeds(ON_CURVE));
        }
        Ok(address)
    }
}

/// Both addresses owned by one authority's campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignAddresses {
    pub campaign: Pubkey,
    pub campaign_bump: u8,
    pub vault: Pubkey,
    pub vault_bump: u8,
}

impl CampaignAddresses {
    pub fn derive<D: AddressDeriver + ?Sized>(
        deriver: &D,
        program_id: &Pubkey,
        authority: &Pubkey,
    ) -> Result<Self, CrowdfundError> {
        let (campaign, campaign_bump) = find_campaign_address(deriver, program_id, authority)?;
        let (vault, vault_bump) = find_vault_address(deriver, program_id, &campaign)?;
        Ok(Self {
            campaign,
            campaign_bump,
            vault,
            vault_bump,
        })
    }
}

pub fn find_campaign_address<D: AddressDeriver + ?Sized>(
    deriver: &D,
    program_id: &Pubkey,
    authority: &Pubkey,
) -> Result<(Pubkey, u8), CrowdfundError> {
    deriver.find_program_address(&[CAMPAIGN_SEED, authority.as_ref()], program_id)
}

pub fn find_vault_address<D: AddressDeriver + ?Sized>(
    deriver: &D,
    program_id: &Pubkey,
    campaign: &Pubkey,
) -> Result<(Pubkey, u8), CrowdfundError> {
    deriver.find_program_address(&[VAULT_SEED, campaign.as_ref()], program_id)
}

/// Recompute the campaign address from the stored bump and compare it with
/// `address`. One hash, no bump search.
pub fn verify_campaign_address<D: AddressDeriver + ?Sized>(
    deriver: &D,
    program_id: &Pubkey,
    authority: &Pubkey,
    bump: u8,
    address: &Pubkey,
) -> Result<(), CrowdfundError> {
    let expected =
        deriver.create_program_address(&[CAMPAIGN_SEED, authority.as_ref(), &[bump]], program_id)?;
    if &expected != address {
        return Err(CrowdfundError::AddressMismatch {
            expected,
            actual: *address,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Pubkey {
        s.parse().unwrap()
    }

    /// Rejects every bump above a threshold so the search has to walk down.
    struct PickyDeriver {
        max_bump: u8,
    }

    impl AddressDeriver for PickyDeriver {
        fn create_program_address(
            &self,
            seeds: &[&[u8]],
            program_id: &Pubkey,
        ) -> Result<Pubkey, CrowdfundError> {
            let bump = seeds.last().and_then(|s| s.first()).copied().unwrap_or(0);
            if bump > self.max_bump {
                return Err(CrowdfundError::InvalidSeeds(ON_CURVE));
            }
            let mut hasher = Sha256::new();
            for seed in seeds {
                hasher.update(seed);
            }
            hasher.update(program_id.as_ref());
            Ok(Pubkey::new_from_array(hasher.finalize().into()))
        }
    }

    #[test]
    fn matches_published_vectors() {
        let program_id = key("BPFLoaderUpgradeab1e11111111111111111111111");
        let seed_key = key("SeedPubey1111111111111111111111111111111111");
        let d = Sha256Deriver;
        assert_eq!(
            d.create_program_address(&[b"", &[1]], &program_id).unwrap(),
            key("BwqrghZA2htAcqq8dzP1WDAhTXYTYWj7CHxF5j7TDBAe")
        );
        assert_eq!(
            d.create_program_address(&["☉".as_bytes(), &[0]], &program_id)
                .unwrap(),
            key("13yWmRpaTR4r5nAktwLqMpRNr28tnVUZw26rTvPSSB19")
        );
        assert_eq!(
            d.create_program_address(&[b"Talking", b"Squirrels"], &program_id)
                .unwrap(),
            key("2fnQrngrQT4SeLcdToJAD96phoEjNL2man2kfRLCASVk")
        );
        assert_eq!(
            d.create_program_address(&[seed_key.as_ref(), &[1]], &program_id)
                .unwrap(),
            key("976ymqVnfE32QFe6NfGDctSvVa36LWnvYxhU6G2232YL")
        );
    }

    #[test]
    fn campaign_and_vault_addresses_are_known() {
        let program_id = key("FjW5aagpT2TbMXyPeah4C2GPdkfDJizQ6RY8RAFfGK2U");
        let authority = key("SeedPubey1111111111111111111111111111111111");
        let addrs = CampaignAddresses::derive(&Sha256Deriver, &program_id, &authority).unwrap();
        assert_eq!(
            addrs.campaign,
            key("9yMEKGNavEyaFKmL1dQeczchVUzYsqQEkCgETwLxbwbv")
        );
        assert_eq!(addrs.campaign_bump, 252);
        assert_eq!(
            addrs.vault,
            key("3WmLuTYkQ34Dx7vrXbWbSHtWyjFLRG4FK3QVqwZvsRzv")
        );
        assert_eq!(addrs.vault_bump, 254);
        assert!(!addrs.campaign.is_on_curve());
        assert!(!addrs.vault.is_on_curve());
    }

    #[test]
    fn derivation_is_deterministic() {
        let program_id = Pubkey::new_from_array([9u8; 32]);
        let authority = Pubkey::new_from_array([3u8; 32]);
        let first = CampaignAddresses::derive(&Sha256Deriver, &program_id, &authority).unwrap();
        for _ in 0..4 {
            let again =
                CampaignAddresses::derive(&Sha256Deriver, &program_id, &authority).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn vault_follows_the_campaign_address() {
        let program_id = Pubkey::new_from_array([9u8; 32]);
        let a = CampaignAddresses::derive(
            &Sha256Deriver,
            &program_id,
            &Pubkey::new_from_array([1u8; 32]),
        )
        .unwrap();
        let b = CampaignAddresses::derive(
            &Sha256Deriver,
            &program_id,
            &Pubkey::new_from_array([2u8; 32]),
        )
        .unwrap();
        assert_ne!(a.campaign, b.campaign);
        assert_ne!(a.vault, b.vault);
        let (vault, _) = find_vault_address(&Sha256Deriver, &program_id, &a.campaign).unwrap();
        assert_eq!(vault, a.vault);
    }

    #[test]
    fn bump_search_walks_down_with_fake_deriver() {
        let d = PickyDeriver { max_bump: 200 };
        let program_id = Pubkey::new_from_array([5u8; 32]);
        let authority = Pubkey::new_from_array([6u8; 32]);
        let (address, bump) = find_campaign_address(&d, &program_id, &authority).unwrap();
        assert_eq!(bump, 200);
        verify_campaign_address(&d, &program_id, &authority, bump, &address).unwrap();
    }

    #[test]
    fn stored_bump_verification_detects_forgery() {
        let program_id = Pubkey::new_from_array([9u8; 32]);
        let authority = Pubkey::new_from_array([3u8; 32]);
        let (address, bump) =
            find_campaign_address(&Sha256Deriver, &program_id, &authority).unwrap();
        verify_campaign_address(&Sha256Deriver, &program_id, &authority, bump, &address).unwrap();

        let forged = Pubkey::new_from_array([4u8; 32]);
        let err = verify_campaign_address(&Sha256Deriver, &program_id, &authority, bump, &forged)
            .unwrap_err();
        assert_eq!(
            err,
            CrowdfundError::AddressMismatch {
                expected: address,
                actual: forged,
            }
        );
    }

    #[test]
    fn seed_limits_are_enforced() {
        let program_id = Pubkey::new_from_array([9u8; 32]);
        let long = [0u8; MAX_SEED_LEN + 1];
        assert_eq!(
            Sha256Deriver
                .create_program_address(&[&long], &program_id)
                .unwrap_err(),
            CrowdfundError::InvalidSeeds("max seed length exceeded")
        );
        let many: Vec<&[u8]> = vec![&b"x"[..]; MAX_SEEDS];
        assert!(Sha256Deriver.find_program_address(&many, &program_id).is_err());
    }

    #[test]
    fn deriver_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Sha256Deriver>();
    }
}

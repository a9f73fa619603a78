use crate::gas::{GAS_COUNT, Gas, GasAmounts, GasMixture};
use crate::pipe_graph::PipeKey;

/// One connected pipe network, treated as a single well-mixed body of gas.
#[derive(Debug, Clone)]
pub struct PipeNet {
    index: usize,
    members: Vec<PipeKey>,
    pub(crate) mixture: GasMixture,
}

impl PipeNet {
    /// Merges the members' own mixtures into one shared mixture whose volume
    /// is the sum of the members' volumes.
    pub(crate) fn from_members<'a>(
        index: usize,
        members: Vec<PipeKey>,
        mixtures: impl IntoIterator<Item = &'a GasMixture>,
    ) -> Self {
        let mut shared: Option<GasMixture> = None;
        let mut volume = 0.0;
        for mixture in mixtures {
            volume += mixture.volume();
            match shared.as_mut() {
                Some(body) => body.merge(mixture),
                None => shared = Some(*mixture),
            }
        }
        let mut mixture = shared.unwrap_or_else(|| GasMixture::new(volume));
        mixture.set_volume(volume);
        Self {
            index,
            members,
            mixture,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn members(&self) -> &[PipeKey] {
        &self.members
    }

    pub fn mixture(&self) -> &GasMixture {
        &self.mixture
    }

    pub fn volume(&self) -> f32 {
        self.mixture.volume()
    }

    pub fn pressure(&self) -> f32 {
        self.mixture.pressure()
    }

    pub fn total_moles(&self) -> f32 {
        self.mixture.total_moles()
    }

    /// The part of the shared gas held by a member of `volume` litres.
    pub fn share(&self, volume: f32) -> GasMixture {
        let mut share = self.mixture.scaled(volume / self.volume());
        share.set_volume(volume);
        share
    }

    /// Adds the given amounts at the network's temperature.
    pub fn add_core_gasses(&mut self, amounts: &[(Gas, f32)]) {
        for &(gas, moles) in amounts {
            self.mixture.add_gas(gas, moles.max(0.0));
        }
    }

    /// Removes up to the given amounts and returns what was actually removed.
    pub fn remove_core_gasses(&mut self, amounts: &[(Gas, f32)]) -> GasAmounts {
        let mut removed = [0.0; GAS_COUNT];
        for &(gas, moles) in amounts {
            removed[gas.index()] += self.mixture.remove_gas(gas, moles);
        }
        removed
    }

    /// Detaches a member, taking its volume share of the gas with it.
    pub(crate) fn release_member(&mut self, key: PipeKey, volume: f32) -> GasMixture {
        self.members.retain(|member| *member != key);
        let total = self.volume();
        let mut parcel = self.mixture.remove_ratio(volume / total);
        parcel.set_volume(volume);
        self.mixture.set_volume(total - volume);
        parcel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PIPE_VOLUME, T20C};
    use bevy::prelude::IVec2;
    use tiles::PipeLayer;

    fn key(x: i32) -> PipeKey {
        PipeKey::new(IVec2::new(x, 0), PipeLayer::Distribution)
    }

    fn pipe_gas(moles: f32, temperature: f32) -> GasMixture {
        let mut mix = GasMixture::new(PIPE_VOLUME).with_temperature(temperature);
        mix.add_gas(Gas::Nitrogen, moles);
        mix
    }

    #[test]
    fn test_from_members_merges_volume_and_heat() {
        let a = pipe_gas(10.0, 300.0);
        let b = pipe_gas(10.0, 500.0);
        let net = PipeNet::from_members(0, vec![key(0), key(1)], [&a, &b]);

        assert_eq!(net.members().len(), 2);
        assert!((net.volume() - 2.0 * PIPE_VOLUME).abs() < 1e-4);
        assert!((net.total_moles() - 20.0).abs() < 1e-5);
        assert!((net.mixture().temperature() - 400.0).abs() < 1e-3);
    }

    #[test]
    fn test_share_splits_by_volume() {
        let a = pipe_gas(30.0, T20C);
        let mut big = GasMixture::new(PIPE_VOLUME * 2.0);
        big.set_temperature(T20C);
        let net = PipeNet::from_members(0, vec![key(0), key(1)], [&a, &big]);

        let small_share = net.share(PIPE_VOLUME);
        assert!((small_share.total_moles() - 10.0).abs() < 1e-4);
        assert!((small_share.pressure() - net.pressure()).abs() < 1e-3);
    }

    #[test]
    fn test_remove_core_gasses_clamps() {
        let a = pipe_gas(5.0, T20C);
        let mut net = PipeNet::from_members(0, vec![key(0)], [&a]);
        let removed = net.remove_core_gasses(&[(Gas::Nitrogen, 8.0), (Gas::Oxygen, 1.0)]);
        assert_eq!(removed[Gas::Nitrogen.index()], 5.0);
        assert_eq!(removed[Gas::Oxygen.index()], 0.0);
        assert_eq!(net.total_moles(), 0.0);
    }

    #[test]
    fn test_release_member_takes_volume_share() {
        let a = pipe_gas(10.0, T20C);
        let b = pipe_gas(20.0, T20C);
        let mut net = PipeNet::from_members(0, vec![key(0), key(1)], [&a, &b]);

        let parcel = net.release_member(key(1), PIPE_VOLUME);
        assert!((parcel.total_moles() - 15.0).abs() < 1e-4);
        assert!((net.total_moles() - 15.0).abs() < 1e-4);
        assert!((net.volume() - PIPE_VOLUME).abs() < 1e-4);
        assert_eq!(net.members(), &[key(0)]);
    }
}

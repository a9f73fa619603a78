use std::collections::{HashMap, HashSet, VecDeque};

use bevy::prelude::*;
use tiles::{PipeLayer, Tilemap};

use crate::constants::PIPE_VOLUME;
use crate::gas::{GAS_COUNT, Gas, GasMixture};
use crate::pipe_net::PipeNet;

/// Graph vertex key: a pipe at a tile position on one pipe layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeKey {
    pub position: IVec2,
    pub layer: PipeLayer,
}

impl PipeKey {
    pub fn new(position: IVec2, layer: PipeLayer) -> Self {
        Self { position, layer }
    }

    fn sort_key(&self) -> (PipeLayer, i32, i32) {
        (self.layer, self.position.y, self.position.x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Pipe,
    /// A closed valve stays in the graph as an isolated vertex.
    Valve { open: bool },
}

impl PipeKind {
    fn connects(self) -> bool {
        match self {
            PipeKind::Pipe => true,
            PipeKind::Valve { open } => open,
        }
    }
}

/// One pipe segment known to the graph.
#[derive(Debug, Clone)]
pub struct AtmosPipe {
    key: PipeKey,
    kind: PipeKind,
    mixture: GasMixture,
    net: Option<usize>,
}

impl AtmosPipe {
    pub fn key(&self) -> PipeKey {
        self.key
    }

    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// This segment's share of its network's gas as of the last equalize.
    pub fn mixture(&self) -> &GasMixture {
        &self.mixture
    }

    pub fn volume(&self) -> f32 {
        self.mixture.volume()
    }

    /// Index of the owning [`PipeNet`]; None until the graph is next resolved.
    pub fn net(&self) -> Option<usize> {
        self.net
    }
}

/// Connectivity graph of every pipe segment plus the networks derived from it.
///
/// Edits (`register_pipe`, `remove_pipe`, `set_valve`) only touch vertices and
/// edges and mark the graph dirty. Connected components are recomputed from
/// scratch by [`PipeNetworks::on_tick`], at most once per tick however many
/// edits arrived.
#[derive(Debug, Default, Resource)]
pub struct PipeNetworks {
    pipes: HashMap<PipeKey, AtmosPipe>,
    edges: HashMap<PipeKey, HashSet<PipeKey>>,
    nets: Vec<PipeNet>,
    dirty: bool,
}

impl PipeNetworks {
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }

    pub fn network_count(&self) -> usize {
        self.nets.len()
    }

    pub fn networks(&self) -> &[PipeNet] {
        &self.nets
    }

    pub fn network(&self, index: usize) -> Option<&PipeNet> {
        self.nets.get(index)
    }

    pub fn try_get_atmos_pipe(&self, key: PipeKey) -> Option<&AtmosPipe> {
        self.pipes.get(&key)
    }

    pub fn network_at(&self, key: PipeKey) -> Option<&PipeNet> {
        self.pipes
            .get(&key)
            .and_then(|pipe| pipe.net)
            .and_then(|index| self.nets.get(index))
    }

    pub fn neighbors(&self, key: PipeKey) -> impl Iterator<Item = PipeKey> + '_ {
        self.edges.get(&key).into_iter().flatten().copied()
    }

    /// Adds a pipe segment (holding vacuum) and links it to adjacent pipes on
    /// the same layer. Returns false if the key is already registered.
    pub fn register_pipe(&mut self, tilemap: &Tilemap, key: PipeKey, kind: PipeKind) -> bool {
        if self.pipes.contains_key(&key) {
            return false;
        }
        self.pipes.insert(
            key,
            AtmosPipe {
                key,
                kind,
                mixture: GasMixture::new(PIPE_VOLUME),
                net: None,
            },
        );
        self.edges.insert(key, HashSet::new());
        if kind.connects() {
            self.link_neighbors(tilemap, key);
        }
        self.dirty = true;
        true
    }

    /// Removes a pipe segment and its edges. Returns the gas it held, which the
    /// caller may release into the surrounding atmosphere.
    pub fn remove_pipe(&mut self, key: PipeKey) -> Option<GasMixture> {
        let pipe = self.pipes.remove(&key)?;
        self.unlink(key);
        self.edges.remove(&key);
        self.dirty = true;

        let released = match pipe.net.and_then(|index| self.nets.get_mut(index)) {
            Some(net) => net.release_member(key, pipe.volume()),
            None => pipe.mixture,
        };
        Some(released)
    }

    /// Opens or closes a valve. A closed valve keeps its vertex but loses its
    /// edges; opening it rediscovers them. Returns false if `key` is not a valve.
    pub fn set_valve(&mut self, tilemap: &Tilemap, key: PipeKey, open: bool) -> bool {
        let Some(pipe) = self.pipes.get_mut(&key) else {
            return false;
        };
        let PipeKind::Valve { open: current } = pipe.kind else {
            return false;
        };
        if current == open {
            return true;
        }
        pipe.kind = PipeKind::Valve { open };
        if open {
            self.link_neighbors(tilemap, key);
        } else {
            self.unlink(key);
        }
        self.dirty = true;
        true
    }

    fn link_neighbors(&mut self, tilemap: &Tilemap, key: PipeKey) {
        let found: Vec<PipeKey> = tilemap
            .pipe_neighbors(key.position, key.layer)
            .map(|position| PipeKey::new(position, key.layer))
            .filter(|other| {
                self.pipes
                    .get(other)
                    .is_some_and(|pipe| pipe.kind.connects())
            })
            .collect();
        for other in found {
            self.edges.entry(key).or_default().insert(other);
            self.edges.entry(other).or_default().insert(key);
        }
    }

    fn unlink(&mut self, key: PipeKey) {
        let linked: Vec<PipeKey> = self.neighbors(key).collect();
        for other in linked {
            if let Some(set) = self.edges.get_mut(&other) {
                set.remove(&key);
            }
        }
        if let Some(set) = self.edges.get_mut(&key) {
            set.clear();
        }
    }

    /// Rebuilds every network if the graph changed since the last call.
    ///
    /// Gas is first pushed from the old networks onto their members, then each
    /// connected component becomes one new [`PipeNet`] holding the sum of its
    /// members' gas. Returns true if a rebuild happened.
    pub fn on_tick(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.equalize();

        let mut order: Vec<PipeKey> = self.pipes.keys().copied().collect();
        order.sort_by_key(PipeKey::sort_key);

        let mut visited: HashSet<PipeKey> = HashSet::with_capacity(order.len());
        let mut nets = Vec::new();
        let mut queue = VecDeque::new();
        for start in order {
            if !visited.insert(start) {
                continue;
            }
            let mut members = Vec::new();
            queue.push_back(start);
            while let Some(key) = queue.pop_front() {
                members.push(key);
                let mut adjacent: Vec<PipeKey> = self.neighbors(key).collect();
                adjacent.sort_by_key(PipeKey::sort_key);
                for next in adjacent {
                    if !self.pipes.contains_key(&next) {
                        warn!("Skipping edge {key:?} -> {next:?}: pipe no longer exists");
                        continue;
                    }
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }

            let index = nets.len();
            let net = PipeNet::from_members(
                index,
                members.clone(),
                members.iter().filter_map(|k| self.pipes.get(k)).map(|p| &p.mixture),
            );
            for key in &members {
                if let Some(pipe) = self.pipes.get_mut(key) {
                    pipe.net = Some(index);
                }
            }
            nets.push(net);
        }

        debug!(
            "Rebuilt pipe networks: {} pipes in {} networks",
            self.pipes.len(),
            nets.len()
        );
        self.nets = nets;
        self.dirty = false;
        self.equalize();
        true
    }

    /// Copies each network's shared gas back onto its members, split by volume.
    pub fn equalize(&mut self) {
        for net in &self.nets {
            for key in net.members() {
                if let Some(pipe) = self.pipes.get_mut(key) {
                    pipe.mixture = net.share(pipe.volume());
                }
            }
        }
    }

    /// The gas body a device at `key` acts on: the shared network mixture, or
    /// the pipe's own mixture if the graph has not been resolved since it was placed.
    fn gas_body_mut(&mut self, key: PipeKey) -> Option<&mut GasMixture> {
        match self.resolved_net(key) {
            Some(index) => Some(&mut self.nets[index].mixture),
            None => self.pipes.get_mut(&key).map(|pipe| &mut pipe.mixture),
        }
    }

    /// Index of the live network holding `key`, if the graph has resolved it.
    fn resolved_net(&self, key: PipeKey) -> Option<usize> {
        self.pipes
            .get(&key)?
            .net
            .filter(|index| *index < self.nets.len())
    }

    /// Adds gas to the network containing `key` at the network's temperature.
    /// Returns false if there is no pipe at `key`.
    pub fn add_core_gasses(&mut self, key: PipeKey, amounts: &[(Gas, f32)]) -> bool {
        if let Some(index) = self.resolved_net(key) {
            self.nets[index].add_core_gasses(amounts);
            return true;
        }
        let Some(pipe) = self.pipes.get_mut(&key) else {
            return false;
        };
        for &(gas, moles) in amounts {
            pipe.mixture.add_gas(gas, moles.max(0.0));
        }
        true
    }

    /// Removes up to the given amounts from the network containing `key`.
    /// Returns the removed gas at the network's temperature, or None if there
    /// is no pipe at `key`.
    pub fn remove_core_gasses(
        &mut self,
        key: PipeKey,
        amounts: &[(Gas, f32)],
    ) -> Option<GasMixture> {
        let (removed, volume, temperature) = match self.resolved_net(key) {
            Some(index) => {
                let net = &mut self.nets[index];
                let removed = net.remove_core_gasses(amounts);
                (removed, net.volume(), net.mixture().temperature())
            }
            None => {
                let mixture = &mut self.pipes.get_mut(&key)?.mixture;
                let mut removed = [0.0; GAS_COUNT];
                for &(gas, moles) in amounts {
                    removed[gas.index()] += mixture.remove_gas(gas, moles);
                }
                (removed, mixture.volume(), mixture.temperature())
            }
        };
        let mut parcel = GasMixture::new(volume).with_temperature(temperature);
        for gas in Gas::ALL {
            parcel.add_gas(gas, removed[gas.index()]);
        }
        Some(parcel)
    }

    /// Mixes `parcel` into the network containing `key`, conserving heat.
    pub fn merge_core_gasses(&mut self, key: PipeKey, parcel: &GasMixture) -> bool {
        let Some(body) = self.gas_body_mut(key) else {
            return false;
        };
        body.merge(parcel);
        true
    }

    /// Removes `moles` from the network containing `key`, keeping its composition.
    pub fn remove_core_moles(&mut self, key: PipeKey, moles: f32) -> Option<GasMixture> {
        self.gas_body_mut(key).map(|body| body.subtract_proportional(moles))
    }

    /// Moles across every network and every not-yet-resolved pipe.
    pub fn total_moles(&self) -> f32 {
        let networked: f32 = self.nets.iter().map(PipeNet::total_moles).sum();
        let loose: f32 = self
            .pipes
            .values()
            .filter(|pipe| pipe.net.is_none())
            .map(|pipe| pipe.mixture.total_moles())
            .sum();
        networked + loose
    }
}

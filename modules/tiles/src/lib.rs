use bevy::prelude::*;
use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Reflect)]
#[reflect(Debug, PartialEq)]
pub enum TileKind {
    Floor,
    Wall,
}

impl TileKind {
    pub fn is_walkable(&self) -> bool {
        match self {
            TileKind::Floor => true,
            TileKind::Wall => false,
        }
    }
}

bitflags! {
    /// Set of pipe layers physically present on a tile.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipeLayers: u8 {
        const DISTRIBUTION = 1 << 0;
        const WASTE = 1 << 1;
        const AUXILIARY = 1 << 2;
    }
}

/// One of the independent pipe layers a tile can carry.
/// Pipes on different layers never connect, even on the same tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Reflect)]
#[reflect(Debug, PartialEq)]
pub enum PipeLayer {
    Distribution,
    Waste,
    Auxiliary,
}

impl PipeLayer {
    pub fn flag(self) -> PipeLayers {
        match self {
            PipeLayer::Distribution => PipeLayers::DISTRIBUTION,
            PipeLayer::Waste => PipeLayers::WASTE,
            PipeLayer::Auxiliary => PipeLayers::AUXILIARY,
        }
    }
}

/// Cardinal offsets in the order east, north, west, south.
pub const CARDINALS: [IVec2; 4] = [IVec2::X, IVec2::Y, IVec2::NEG_X, IVec2::NEG_Y];

#[derive(Debug, Clone, Resource, Reflect)]
#[reflect(Debug, Resource)]
pub struct Tilemap {
    width: u32,
    height: u32,
    tiles: Vec<TileKind>,
    /// Pipe layers present per tile. Pipes may run under walls.
    #[reflect(ignore)]
    pipes: Vec<PipeLayers>,
}

impl Tilemap {
    pub fn new(width: u32, height: u32, fill: TileKind) -> Self {
        let size = width as usize * height as usize;
        Self {
            width,
            height,
            tiles: vec![fill; size],
            pipes: vec![PipeLayers::empty(); size],
        }
    }

    /// A 16×10 station section: outer walls and a wall splitting it into a
    /// west room (x 1..=9) and an east room (x 11..=14).
    pub fn test_room() -> Self {
        let mut tilemap = Self::new(16, 10, TileKind::Floor);
        for x in 0..16 {
            tilemap.set(IVec2::new(x, 0), TileKind::Wall);
            tilemap.set(IVec2::new(x, 9), TileKind::Wall);
        }
        for y in 0..10 {
            tilemap.set(IVec2::new(0, y), TileKind::Wall);
            tilemap.set(IVec2::new(10, y), TileKind::Wall);
            tilemap.set(IVec2::new(15, y), TileKind::Wall);
        }
        tilemap
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn coord_to_index(&self, pos: IVec2) -> Option<usize> {
        if pos.x >= 0 && pos.x < self.width as i32 && pos.y >= 0 && pos.y < self.height as i32 {
            Some(pos.y as usize * self.width as usize + pos.x as usize)
        } else {
            None
        }
    }

    pub fn in_bounds(&self, pos: IVec2) -> bool {
        self.coord_to_index(pos).is_some()
    }

    pub fn get(&self, pos: IVec2) -> Option<TileKind> {
        self.coord_to_index(pos).map(|idx| self.tiles[idx])
    }

    pub fn set(&mut self, pos: IVec2, kind: TileKind) -> bool {
        if let Some(idx) = self.coord_to_index(pos) {
            self.tiles[idx] = kind;
            true
        } else {
            false
        }
    }

    pub fn is_walkable(&self, pos: IVec2) -> bool {
        self.get(pos).is_some_and(|kind| kind.is_walkable())
    }

    /// Pipe layers present at `pos`. Out-of-bounds positions carry none.
    pub fn pipe_layers(&self, pos: IVec2) -> PipeLayers {
        self.coord_to_index(pos)
            .map_or(PipeLayers::empty(), |idx| self.pipes[idx])
    }

    pub fn has_pipe(&self, pos: IVec2, layer: PipeLayer) -> bool {
        self.pipe_layers(pos).contains(layer.flag())
    }

    /// Places or removes the pipe component of `layer` at `pos`.
    /// Returns false if the position is out of bounds.
    pub fn set_pipe(&mut self, pos: IVec2, layer: PipeLayer, present: bool) -> bool {
        let Some(idx) = self.coord_to_index(pos) else {
            return false;
        };
        self.pipes[idx].set(layer.flag(), present);
        true
    }

    /// In-bounds cardinal neighbours of `pos`, in [`CARDINALS`] order.
    pub fn cardinal_neighbors(&self, pos: IVec2) -> impl Iterator<Item = IVec2> + '_ {
        CARDINALS
            .iter()
            .map(move |offset| pos + *offset)
            .filter(move |n| self.in_bounds(*n))
    }

    /// Cardinal neighbours of `pos` that carry a pipe on `layer`.
    pub fn pipe_neighbors(&self, pos: IVec2, layer: PipeLayer) -> impl Iterator<Item = IVec2> + '_ {
        self.cardinal_neighbors(pos)
            .filter(move |n| self.has_pipe(*n, layer))
    }

    /// Returns an iterator over all tiles with their positions and kinds
    pub fn iter(&self) -> impl Iterator<Item = (IVec2, TileKind)> + '_ {
        self.tiles.iter().enumerate().map(move |(idx, kind)| {
            let x = (idx % self.width as usize) as i32;
            let y = (idx / self.width as usize) as i32;
            (IVec2::new(x, y), *kind)
        })
    }
}

pub struct TilesPlugin;

impl Plugin for TilesPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<TileKind>();
        app.register_type::<PipeLayer>();
        app.register_type::<Tilemap>();
    }
}

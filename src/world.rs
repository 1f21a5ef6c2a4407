//! The live map: a grid of nodes, the objects standing on them and the
//! fixed-rate logic clock.

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::{level::AlmLevel, obstacle::ObstacleClasses, rect::Rect};

/// Highest accepted game speed.
pub const MAX_SPEED: u32 = 8;
pub const DEFAULT_SPEED: u32 = 5;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u16 {
        const BLOCKED_GROUND = 0x0001;
        const BLOCKED_AIR = 0x0002;
        const DISCOVERED = 0x0004;
        const VISIBLE = 0x0008;
        const UNBLOCKED = 0x0010;
        const DYNAMIC_GROUND = 0x0020;
        const DYNAMIC_AIR = 0x0040;
        const BLOCKED_TERRAIN = 0x0080;
        const NEED_REDRAW = 0x0100;
        const NEED_REDRAW_FOG = 0x0200;
    }
}

/// Packed terrain tile reference: bank in bits 12-15, tile image in bits
/// 8-11, row within the image in bits 0-7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileId(pub u16);

impl TileId {
    pub const fn new(bank: u8, image: u8, row: u8) -> Self {
        TileId(((bank as u16 & 0xF) << 12) | ((image as u16 & 0xF) << 8) | row as u16)
    }

    pub const fn bank(self) -> u8 {
        (self.0 >> 12) as u8
    }

    pub const fn image(self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    pub const fn row(self) -> u8 {
        self.0 as u8
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapNode {
    pub tile: TileId,
    pub height: i8,
    pub flags: NodeFlags,
    pub objects: Vec<ObjectHandle>,
}

/// Generational reference into the world's object arena. A handle outlives
/// its object safely: lookups on a removed object return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obstacle {
    /// Index into [`ObstacleClasses`].
    pub class: usize,
    /// Current step in the class animation.
    pub frame: usize,
    pub time: u32,
}

impl Obstacle {
    pub fn new(class: usize) -> Self {
        Self {
            class,
            frame: 0,
            time: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapObjectKind {
    Obstacle(Obstacle),
}

impl MapObjectKind {
    fn link_flags(&self) -> NodeFlags {
        match self {
            MapObjectKind::Obstacle(_) => NodeFlags::BLOCKED_GROUND,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapObject {
    position: Rect,
    linked: bool,
    pub kind: MapObjectKind,
}

impl MapObject {
    pub fn position(&self) -> Rect {
        self.position
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

struct Slot {
    generation: u32,
    object: Option<MapObject>,
}

pub struct World {
    width: u32,
    height: u32,
    nodes: Vec<MapNode>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    speed: u32,
    last_time: Option<u64>,
    accumulated: u64,
    ticks: u64,
}

impl World {
    /// An empty, flat map with every node due for drawing.
    pub fn new(width: u32, height: u32) -> Self {
        let node = MapNode {
            flags: NodeFlags::NEED_REDRAW | NodeFlags::NEED_REDRAW_FOG,
            ..Default::default()
        };
        Self {
            width,
            height,
            nodes: vec![node; (width * height) as usize],
            slots: Vec::new(),
            free: Vec::new(),
            speed: DEFAULT_SPEED,
            last_time: None,
            accumulated: 0,
            ticks: 0,
        }
    }

    /// Builds the grid from a level and spawns its obstacles. Obstacle ids
    /// without a class are skipped.
    pub fn from_level(level: &AlmLevel, classes: &ObstacleClasses) -> Self {
        let mut world = Self::new(level.width(), level.height());
        for (node, (&tile, &height)) in world
            .nodes
            .iter_mut()
            .zip(level.tiles.iter().zip(level.heights.iter()))
        {
            node.tile = TileId(tile);
            node.height = height;
        }

        let width = level.width().max(1) as usize;
        let mut missing = 0;
        for (i, &id) in level.obstacles.iter().enumerate() {
            if id == 0 {
                continue;
            }
            match classes.index_of(id as i32) {
                Some(class) => {
                    let (x, y) = ((i % width) as i32, (i / width) as i32);
                    world.spawn(MapObjectKind::Obstacle(Obstacle::new(class)), x, y);
                }
                None => missing += 1,
            }
        }
        if missing > 0 {
            warn!("{} obstacles reference unknown classes", missing);
        }
        debug!(
            "world {}x{} with {} objects",
            world.width,
            world.height,
            world.objects().count()
        );
        world
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    /// Row-major node storage.
    pub fn nodes(&self) -> &[MapNode] {
        &self.nodes
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        self.bounds()
            .contains(x, y)
            .then(|| y as usize * self.width as usize + x as usize)
    }

    pub fn node(&self, x: i32, y: i32) -> Option<&MapNode> {
        self.index(x, y).map(|i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, x: i32, y: i32) -> Option<&mut MapNode> {
        self.index(x, y).map(move |i| &mut self.nodes[i])
    }

    /// Node at `(x, y)` clamped into the map.
    fn clamped(&self, x: i32, y: i32) -> &MapNode {
        let x = x.clamp(0, self.width as i32 - 1);
        let y = y.clamp(0, self.height as i32 - 1);
        &self.nodes[y as usize * self.width as usize + x as usize]
    }

    /// Height of the node at `(x, y)`, clamped to the map edge. Empty maps
    /// are flat.
    pub fn height_of(&self, x: i32, y: i32) -> i32 {
        if self.nodes.is_empty() {
            return 0;
        }
        self.clamped(x, y).height as i32
    }

    /// Terrain height in pixels at a fractional node position.
    pub fn height_at(&self, x: f32, y: f32) -> f32 {
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i32, y0 as i32);
        let h = |dx, dy| self.height_of(x0 + dx, y0 + dy) as f32;
        let top = h(0, 0) + (h(1, 0) - h(0, 0)) * fx;
        let bottom = h(0, 1) + (h(1, 1) - h(0, 1)) * fx;
        top + (bottom - top) * fy
    }

    /// Sets flags on every node of `rect` inside the map.
    pub fn invalidate(&mut self, rect: Rect, flags: NodeFlags) {
        for (x, y) in rect.intersection(&self.bounds()).points() {
            if let Some(node) = self.node_mut(x, y) {
                node.flags |= flags;
            }
        }
    }

    /// Updates a node's visibility, marking the fog around it for redraw.
    /// Visible nodes are discovered too.
    pub fn set_visible(&mut self, x: i32, y: i32, visible: bool) {
        let Some(node) = self.node_mut(x, y) else {
            return;
        };
        let before = node.flags;
        if visible {
            node.flags |= NodeFlags::VISIBLE | NodeFlags::DISCOVERED;
        } else {
            node.flags.remove(NodeFlags::VISIBLE);
        }
        if node.flags != before {
            self.invalidate(Rect::new(x - 1, y - 1, 3, 3), NodeFlags::NEED_REDRAW_FOG);
        }
    }

    pub fn reveal_all(&mut self) {
        for node in &mut self.nodes {
            node.flags |= NodeFlags::VISIBLE | NodeFlags::DISCOVERED | NodeFlags::NEED_REDRAW_FOG;
        }
    }

    pub fn spawn(&mut self, kind: MapObjectKind, x: i32, y: i32) -> ObjectHandle {
        let object = MapObject {
            position: Rect::new(0, 0, 0, 0),
            linked: false,
            kind,
        };
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                ObjectHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                });
                ObjectHandle {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        };
        self.set_position(handle, x, y);
        handle
    }

    /// Unlinks and drops the object; its handle goes stale.
    pub fn remove(&mut self, handle: ObjectHandle) -> Option<MapObject> {
        self.get(handle)?;
        self.unlink(handle);
        let slot = &mut self.slots[handle.index as usize];
        let object = slot.object.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        object
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&MapObject> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.object.as_ref())
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut MapObject> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.object.as_mut())
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectHandle, &MapObject)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.object.as_ref().map(|o| {
                (
                    ObjectHandle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    o,
                )
            })
        })
    }

    /// Moves the object to `(x, y)`, relinking it. The footprint is clipped
    /// to the map.
    pub fn set_position(&mut self, handle: ObjectHandle, x: i32, y: i32) -> bool {
        if self.get(handle).is_none() {
            return false;
        }
        self.unlink(handle);
        let bounds = self.bounds();
        if let Some(object) = self.get_mut(handle) {
            object.position = Rect::new(x, y, 1, 1).intersection(&bounds);
        }
        self.link(handle);
        true
    }

    fn link(&mut self, handle: ObjectHandle) {
        let Some(object) = self.get_mut(handle) else {
            return;
        };
        if object.linked {
            return;
        }
        object.linked = true;
        let (rect, flags) = (object.position, object.kind.link_flags());
        for (x, y) in rect.points() {
            if let Some(node) = self.node_mut(x, y) {
                node.flags |= flags;
                node.objects.push(handle);
            }
        }
    }

    fn unlink(&mut self, handle: ObjectHandle) {
        let Some(object) = self.get_mut(handle) else {
            return;
        };
        if !object.linked {
            return;
        }
        object.linked = false;
        let (rect, flags) = (object.position, object.kind.link_flags());
        for (x, y) in rect.points() {
            if let Some(node) = self.node_mut(x, y) {
                node.flags.remove(flags);
                node.objects.retain(|&h| h != handle);
            }
        }
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Sets the game speed, clamped to [`MAX_SPEED`]. Returns the applied value.
    pub fn set_speed(&mut self, speed: u32) -> u32 {
        self.speed = speed.min(MAX_SPEED);
        self.speed
    }

    /// Fixed ticks per second at the current speed.
    pub fn ticks_per_second(&self) -> u64 {
        5 * (self.speed as u64 + 1)
    }

    /// Fixed ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Advances the logic clock to `now_ms`, running as many fixed ticks as
    /// have elapsed. The first call only starts the clock. Returns the number
    /// of ticks run.
    pub fn tick(&mut self, now_ms: u64, classes: &ObstacleClasses) -> u64 {
        let last = *self.last_time.get_or_insert(now_ms);
        self.last_time = Some(now_ms.max(last));
        self.accumulated += now_ms.saturating_sub(last) * self.ticks_per_second();

        let due = self.accumulated / 1000;
        self.accumulated %= 1000;
        for _ in 0..due {
            self.fixed_tick(classes);
        }
        due
    }

    pub fn fixed_tick(&mut self, classes: &ObstacleClasses) {
        self.ticks += 1;
        for i in 0..self.slots.len() {
            let Some(object) = self.slots[i].object.as_ref() else {
                continue;
            };
            let position = object.position;
            let MapObjectKind::Obstacle(obstacle) = &object.kind;
            let Some(class) = classes.get(obstacle.class) else {
                continue;
            };
            if class.frames.len() <= 1 {
                continue;
            }

            // animate only while the obstacle or the two nodes above it are in view
            let (x, y) = (position.x, position.y);
            let seen = (0..3).any(|dy| {
                self.node(x, y - dy)
                    .map_or(false, |n| n.flags.contains(NodeFlags::VISIBLE))
            });
            if !seen {
                continue;
            }

            let Some(MapObject {
                kind: MapObjectKind::Obstacle(obstacle),
                ..
            }) = self.slots[i].object.as_mut()
            else {
                continue;
            };
            obstacle.time += 1;
            let hold = class
                .frames
                .get(obstacle.frame)
                .and_then(|f| f.time)
                .unwrap_or(u32::MAX);
            if obstacle.time > hold {
                obstacle.frame = (obstacle.frame + 1) % class.frames.len();
                obstacle.time = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registry, RegistryValue, RegistryWriter};

    fn classes() -> ObstacleClasses {
        let mut w = RegistryWriter::new();
        for (path, value) in [
            ("Global/ObjectCount", RegistryValue::Integer(2)),
            ("Object0/ID", RegistryValue::Integer(3)),
            ("Object1/ID", RegistryValue::Integer(4)),
            ("Object1/AnimationTime", RegistryValue::Array(vec![1, 2])),
            ("Object1/AnimationFrame", RegistryValue::Array(vec![0, 1])),
        ] {
            w.set(path, value).unwrap();
        }
        ObstacleClasses::from_registry(&Registry::parse(&w.to_bytes().unwrap()).unwrap())
    }

    fn level() -> AlmLevel {
        let mut level = AlmLevel::new(4, 3).unwrap();
        level.tiles[1] = TileId::new(2, 3, 7).0;
        level.heights = vec![0, 10, 0, 0, 0, 20, 0, 0, 0, 0, 0, 0];
        level.obstacles[5] = 3;
        level.obstacles[6] = 4;
        level.obstacles[7] = 77;
        level
    }

    #[test]
    fn tile_ids_unpack() {
        let id = TileId(0x2307);
        assert_eq!((id.bank(), id.image(), id.row()), (2, 3, 7));
        assert_eq!(TileId::new(2, 3, 7), id);
    }

    #[test]
    fn level_becomes_world() {
        let world = World::from_level(&level(), &classes());
        assert_eq!(world.objects().count(), 2);
        assert_eq!(world.node(1, 0).unwrap().tile.image(), 3);

        let node = world.node(1, 1).unwrap();
        assert_eq!(node.height, 20);
        assert!(node.flags.contains(NodeFlags::BLOCKED_GROUND));
        assert_eq!(node.objects.len(), 1);
        assert!(world.node(3, 1).unwrap().objects.is_empty());
        assert!(world.node(4, 0).is_none());
    }

    #[test]
    fn heights_interpolate() {
        let world = World::from_level(&level(), &classes());
        assert_eq!(world.height_at(1.0, 0.0), 10.0);
        assert_eq!(world.height_at(0.5, 0.0), 5.0);
        assert_eq!(world.height_at(1.0, 0.5), 15.0);
        assert_eq!(world.height_at(-3.0, 0.0), 0.0);
        assert_eq!(world.height_at(1.5, 1.5), 5.0);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut world = World::new(4, 4);
        let kind = MapObjectKind::Obstacle(Obstacle::new(0));
        let a = world.spawn(kind.clone(), 1, 1);
        assert!(world.node(1, 1).unwrap().flags.contains(NodeFlags::BLOCKED_GROUND));

        assert!(world.remove(a).is_some());
        assert!(world.get(a).is_none());
        assert!(world.remove(a).is_none());
        assert!(!world.node(1, 1).unwrap().flags.contains(NodeFlags::BLOCKED_GROUND));
        assert!(world.node(1, 1).unwrap().objects.is_empty());

        let b = world.spawn(kind, 2, 2);
        assert_ne!(a, b);
        assert!(world.get(a).is_none());
        assert!(world.get(b).is_some());
    }

    #[test]
    fn moving_relinks() {
        let mut world = World::new(4, 4);
        let h = world.spawn(MapObjectKind::Obstacle(Obstacle::new(0)), 0, 0);
        assert!(world.set_position(h, 3, 2));
        assert!(world.node(0, 0).unwrap().objects.is_empty());
        assert_eq!(world.node(3, 2).unwrap().objects, vec![h]);
        assert_eq!(world.get(h).unwrap().position(), Rect::new(3, 2, 1, 1));

        // off the map the footprint is empty and nothing is linked
        world.set_position(h, 9, 9);
        assert!(world.get(h).unwrap().position().is_empty());
        assert!(world.node(3, 2).unwrap().objects.is_empty());
    }

    #[test]
    fn speed_and_clock() {
        let classes = classes();
        let mut world = World::new(2, 2);
        assert_eq!(world.speed(), DEFAULT_SPEED);
        assert_eq!(world.set_speed(20), MAX_SPEED);
        world.set_speed(1);
        assert_eq!(world.ticks_per_second(), 10);

        assert_eq!(world.tick(5_000, &classes), 0);
        assert_eq!(world.tick(5_050, &classes), 0);
        assert_eq!(world.tick(5_100, &classes), 1);
        assert_eq!(world.tick(6_100, &classes), 10);
        assert_eq!(world.tick_count(), 11);
    }

    #[test]
    fn obstacles_animate_only_when_seen() {
        let classes = classes();
        let mut world = World::from_level(&level(), &classes);
        let (animated, _) = world
            .objects()
            .find(|(_, o)| o.position() == Rect::new(2, 1, 1, 1))
            .unwrap();
        let frame = |w: &World| match &w.get(animated).unwrap().kind {
            MapObjectKind::Obstacle(o) => (o.frame, o.time),
        };

        world.fixed_tick(&classes);
        assert_eq!(frame(&world), (0, 0));

        // visibility two rows above still counts
        world.set_visible(2, 0, true);
        world.fixed_tick(&classes);
        assert_eq!(frame(&world), (0, 1));
        world.fixed_tick(&classes);
        assert_eq!(frame(&world), (1, 0));
        for _ in 0..3 {
            world.fixed_tick(&classes);
        }
        assert_eq!(frame(&world), (0, 0));
    }

    #[test]
    fn visibility_marks_fog() {
        let mut world = World::new(4, 4);
        for (x, y) in world.bounds().points() {
            world.node_mut(x, y).unwrap().flags = NodeFlags::empty();
        }
        world.set_visible(0, 0, true);
        assert!(world.node(1, 1).unwrap().flags.contains(NodeFlags::NEED_REDRAW_FOG));
        assert!(!world.node(2, 2).unwrap().flags.contains(NodeFlags::NEED_REDRAW_FOG));
        assert!(world.node(0, 0).unwrap().flags.contains(NodeFlags::DISCOVERED));

        world.set_visible(0, 0, false);
        let flags = world.node(0, 0).unwrap().flags;
        assert!(flags.contains(NodeFlags::DISCOVERED) && !flags.contains(NodeFlags::VISIBLE));
    }
}

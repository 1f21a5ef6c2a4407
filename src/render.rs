//! Terrain and fog-of-war rendering.
//!
//! The renderer keeps a truecolor terrain cache and an 8-bit fog cache the
//! size of the view. Only nodes flagged `NEED_REDRAW` / `NEED_REDRAW_FOG`
//! are recomputed; scrolling shifts both caches and redraws the cells that
//! came into view. Objects are painted on top every frame through a
//! weight-ordered [`DrawQueue`], then the fog multiplies the result.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::{
    color::Color,
    compound_palette::{CompoundPalette, NEUTRAL_LEVEL},
    config::{LightingConfig, RenderConfig},
    error::Result,
    image::{move_in_place, Image, ImagePaletted, ImageTruecolor},
    obstacle::ObstacleClasses,
    palette::Palette,
    rect::Rect,
    resources::ResourceManager,
    screen::DrawContext,
    world::{MapObjectKind, NodeFlags, Obstacle, TileId, World},
};

pub const TILE_SIZE: i32 = 32;
/// Rows rendered above and below the view for cells lifted or sunk by
/// their height.
pub const HEIGHT_MARGIN: i32 = 4;
/// Compound palette level obstacle sprites are drawn with.
pub const OBJECT_LIGHT_LEVEL: usize = 16;
/// Shadows sort this far behind the object casting them.
pub const SHADOW_WEIGHT_OFFSET: i32 = 32;

const FOG_VISIBLE: u8 = 255;
const FOG_DISCOVERED: u8 = 128;
const FOG_UNSEEN: u8 = 0;

const GRID_COLOR: Color = Color::new(255, 255, 255, 48);

type DrawCall<'a> = Box<dyn FnOnce(&mut DrawContext) + 'a>;

/// Deferred draw calls, run in ascending weight order. Equal weights run in
/// the order they were pushed.
#[derive(Default)]
pub struct DrawQueue<'a> {
    calls: BTreeMap<(i32, u64), DrawCall<'a>>,
    next: u64,
}

impl<'a> DrawQueue<'a> {
    pub fn new() -> Self {
        Self {
            calls: BTreeMap::new(),
            next: 0,
        }
    }

    pub fn push(&mut self, weight: i32, draw: impl FnOnce(&mut DrawContext) + 'a) {
        self.calls.insert((weight, self.next), Box::new(draw));
        self.next += 1;
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn flush(self, ctx: &mut DrawContext) {
        for (_, draw) in self.calls {
            draw(ctx);
        }
    }
}

pub struct TileImage {
    image: ImagePaletted,
    palette: CompoundPalette,
}

impl TileImage {
    pub fn new(image: ImagePaletted) -> Self {
        let palette = CompoundPalette::new(image.palette());
        Self { image, palette }
    }

    pub fn image(&self) -> &ImagePaletted {
        &self.image
    }

    /// Lit colour of the texel at `(x, y)`; `None` outside the image or
    /// before the palettes are generated.
    fn color(&self, x: usize, y: usize, level: usize) -> Option<Color> {
        if x >= self.image.width() || y >= self.image.height() {
            return None;
        }
        let index = self.image.pixel_at(x, y);
        self.palette.palette(level).map(|p| p[index as usize])
    }
}

/// Terrain tile images keyed by `(bank, image)`.
#[derive(Default)]
pub struct TileSet {
    images: HashMap<(u8, u8), TileImage>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile_path(bank: u8, image: u8) -> String {
        format!("graphics/terrain/tile{}-{:02}.bmp", bank, image)
    }

    /// Loads every tile image the world's nodes refer to.
    pub fn load(resources: &ResourceManager, world: &World) -> Result<Self> {
        let wanted: BTreeSet<(u8, u8)> = world
            .nodes()
            .iter()
            .map(|n| (n.tile.bank(), n.tile.image()))
            .collect();

        let mut tiles = Self::new();
        for (bank, image) in wanted {
            let bitmap = ImagePaletted::load(resources, &Self::tile_path(bank, image))?;
            tiles.insert(bank, image, bitmap);
        }
        debug!("loaded {} tile images", tiles.len());
        Ok(tiles)
    }

    pub fn insert(&mut self, bank: u8, image: u8, bitmap: ImagePaletted) {
        self.images.insert((bank, image), TileImage::new(bitmap));
    }

    pub fn get(&self, tile: TileId) -> Option<&TileImage> {
        self.images.get(&(tile.bank(), tile.image()))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn update_palettes(&mut self, lighting: &LightingConfig) {
        let tint = tint_color(lighting);
        for tile in self.images.values_mut() {
            tile.palette
                .update_palettes(tint, lighting.brightness, lighting.contrast);
        }
    }
}

fn tint_color(lighting: &LightingConfig) -> Color {
    let [r, g, b] = lighting.tint;
    Color::rgb(r, g, b)
}

/// Scroll position and size of the last rendered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct View {
    scroll_x: i32,
    scroll_y: i32,
    width: usize,
    height: usize,
}

impl View {
    /// Nodes whose cells can touch the view, before clipping to the map.
    fn cells(&self) -> Rect {
        let cols = (self.width as i32 + TILE_SIZE - 1) / TILE_SIZE;
        let rows = (self.height as i32 + TILE_SIZE - 1) / TILE_SIZE;
        Rect::new(
            self.scroll_x,
            self.scroll_y - HEIGHT_MARGIN,
            cols,
            rows + 2 * HEIGHT_MARGIN,
        )
    }

    /// Nodes whose cached pixels stay complete after a scroll: fully on
    /// screen horizontally and far enough from the top and bottom edges
    /// that no height could have pushed them out.
    fn interior(&self) -> Rect {
        Rect::new(
            self.scroll_x,
            self.scroll_y + HEIGHT_MARGIN,
            self.width as i32 / TILE_SIZE,
            (self.height as i32 / TILE_SIZE - 2 * HEIGHT_MARGIN).max(0),
        )
    }

    /// Top-left pixel of node `(x, y)` at height 0.
    fn origin(&self, x: i32, y: i32) -> (i32, i32) {
        ((x - self.scroll_x) * TILE_SIZE, (y - self.scroll_y) * TILE_SIZE)
    }
}

fn fog_state(flags: NodeFlags) -> u8 {
    if flags.contains(NodeFlags::VISIBLE) {
        FOG_VISIBLE
    } else if flags.contains(NodeFlags::DISCOVERED) {
        FOG_DISCOVERED
    } else {
        FOG_UNSEEN
    }
}

/// Light level of a node from the slope around it.
fn light_at(world: &World, x: i32, y: i32) -> i32 {
    let h = |x, y| world.height_of(x, y);
    let slope = (h(x - 1, y) - h(x + 1, y) + h(x, y - 1) - h(x, y + 1)) / 2;
    NEUTRAL_LEVEL as i32 + slope.clamp(-32, 32)
}

/// Fills everything outside `keep` with `value`.
fn clear_outside<T: Copy>(buf: &mut [T], width: usize, keep: Rect, value: T) {
    if width == 0 {
        return;
    }
    for (y, row) in buf.chunks_mut(width).enumerate() {
        let y = y as i32;
        if keep.is_empty() || y < keep.top() || y >= keep.bottom() {
            row.fill(value);
            continue;
        }
        row[..keep.left() as usize].fill(value);
        row[keep.right() as usize..].fill(value);
    }
}

pub struct MapRenderer {
    config: RenderConfig,
    lighting: LightingConfig,
    terrain: ImageTruecolor,
    fog: Vec<u8>,
    view: Option<View>,
    object_palettes: HashMap<String, CompoundPalette>,
    frames: u64,
}

impl MapRenderer {
    pub fn new(config: &RenderConfig, lighting: LightingConfig) -> Self {
        Self {
            config: config.clone(),
            lighting,
            terrain: ImageTruecolor::new(0, 0),
            fog: Vec::new(),
            view: None,
            object_palettes: HashMap::new(),
            frames: 0,
        }
    }

    pub fn set_lighting(&mut self, lighting: LightingConfig) {
        if self.lighting != lighting {
            self.lighting = lighting;
            self.view = None;
        }
    }

    /// Forgets the caches; the next frame redraws every visible cell.
    pub fn invalidate(&mut self) {
        self.view = None;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Renders one frame into `ctx`, scrolled so node `scroll` sits at the
    /// top-left corner.
    pub fn render(
        &mut self,
        ctx: &mut DrawContext,
        world: &mut World,
        tiles: &mut TileSet,
        classes: &ObstacleClasses,
        scroll: (i32, i32),
    ) {
        let view = View {
            scroll_x: scroll.0,
            scroll_y: scroll.1,
            width: ctx.width().max(0) as usize,
            height: ctx.height().max(0) as usize,
        };
        self.update_view(world, view);

        tiles.update_palettes(&self.lighting);
        self.update_object_palettes(classes);

        let cells = view.cells().intersection(&world.bounds());
        for (x, y) in cells.points() {
            let Some(flags) = world.node(x, y).map(|n| n.flags) else {
                continue;
            };
            if flags.contains(NodeFlags::NEED_REDRAW) {
                self.draw_cell(world, tiles, &view, x, y);
            }
            if flags.contains(NodeFlags::NEED_REDRAW_FOG) {
                self.draw_fog_cell(world, &view, x, y);
            }
            if let Some(node) = world.node_mut(x, y) {
                node.flags
                    .remove(NodeFlags::NEED_REDRAW | NodeFlags::NEED_REDRAW_FOG);
            }
        }

        self.terrain.blit(ctx, 0, 0);

        let mut queue = DrawQueue::new();
        self.enqueue_objects(&mut queue, world, classes, &view, cells);
        queue.flush(ctx);

        if self.config.fog {
            for y in 0..view.height {
                let Some(row) = ctx.row_mut(y as i32) else {
                    continue;
                };
                let fog = &self.fog[y * view.width..(y + 1) * view.width];
                for (c, &f) in row.iter_mut().zip(fog) {
                    *c = c.scaled(f);
                }
            }
        }

        self.frames += 1;
    }

    fn update_view(&mut self, world: &mut World, view: View) {
        let dirty = NodeFlags::NEED_REDRAW | NodeFlags::NEED_REDRAW_FOG;
        match self.view {
            Some(old) if old == view => {}
            Some(old) if (old.width, old.height) == (view.width, view.height) => {
                let dx = (old.scroll_x - view.scroll_x) * TILE_SIZE;
                let dy = (old.scroll_y - view.scroll_y) * TILE_SIZE;
                self.terrain.move_in_place(dx, dy);
                move_in_place(&mut self.fog, view.width, view.height, dx, dy);

                let bounds = Rect::new(0, 0, view.width as i32, view.height as i32);
                let moved = Rect::new(dx, dy, bounds.w, bounds.h).intersection(&bounds);
                clear_outside(self.terrain.pixels_mut(), view.width, moved, Color::BLACK);
                clear_outside(&mut self.fog, view.width, moved, FOG_UNSEEN);

                let kept = old.interior();
                let cells = view.cells().intersection(&world.bounds());
                let mut redrawn = 0;
                for (x, y) in cells.points() {
                    if !kept.contains(x, y) {
                        world.invalidate(Rect::new(x, y, 1, 1), dirty);
                        redrawn += 1;
                    }
                }
                debug!("scrolled by ({}, {}), {} cells to redraw", dx, dy, redrawn);
            }
            _ => {
                self.terrain.set_size(view.width, view.height);
                self.terrain.pixels_mut().fill(Color::BLACK);
                self.fog = vec![FOG_UNSEEN; view.width * view.height];
                world.invalidate(view.cells(), dirty);
            }
        }
        self.view = Some(view);
    }

    fn draw_cell(&mut self, world: &World, tiles: &TileSet, view: &View, cx: i32, cy: i32) {
        let Some(node) = world.node(cx, cy) else {
            return;
        };
        let tile = node.tile;
        let Some(texture) = tiles.get(tile) else {
            return;
        };

        let (width, height) = (view.width as i32, view.height as i32);
        let (bx, by) = view.origin(cx, cy);
        let h = |dx, dy| world.height_of(cx + dx, cy + dy);
        let (h00, h10, h01, h11) = (h(0, 0), h(1, 0), h(0, 1), h(1, 1));

        let top = by - h00.max(h10);
        let bottom = by + TILE_SIZE - h01.min(h11);
        if bottom <= 0 || top >= height || bx + TILE_SIZE <= 0 || bx >= width {
            return;
        }

        let l = |dx, dy| light_at(world, cx + dx, cy + dy);
        let (l00, l10, l01, l11) = (l(0, 0), l(1, 0), l(0, 1), l(1, 1));
        let row_base = tile.row() as usize * TILE_SIZE as usize;
        let pixels = self.terrain.pixels_mut();

        for i in 0..TILE_SIZE {
            let px = bx + i;
            if !(0..width).contains(&px) {
                continue;
            }
            let top = by - (h00 * (TILE_SIZE - i) + h10 * i) / TILE_SIZE;
            let bottom = by + TILE_SIZE - (h01 * (TILE_SIZE - i) + h11 * i) / TILE_SIZE;
            let span = bottom - top;
            if span <= 0 {
                continue;
            }
            let light_top = l00 * (TILE_SIZE - i) + l10 * i;
            let light_bottom = l01 * (TILE_SIZE - i) + l11 * i;

            for sy in top.max(0)..bottom.min(height) {
                let v = ((sy - top) * TILE_SIZE / span).clamp(0, TILE_SIZE - 1);
                let level = (light_top * (TILE_SIZE - v) + light_bottom * v) / (TILE_SIZE * TILE_SIZE);
                let Some(mut c) = texture.color(i as usize, row_base + v as usize, level as usize) else {
                    continue;
                };
                if self.config.show_grid && (i == 0 || v == 0) {
                    c = GRID_COLOR.blend_over(c);
                }
                pixels[sy as usize * view.width + px as usize] = c;
            }
        }
    }

    fn draw_fog_cell(&mut self, world: &World, view: &View, cx: i32, cy: i32) {
        let Some(centre) = world.node(cx, cy).map(|n| fog_state(n.flags)) else {
            return;
        };
        let mut states = [[centre; 3]; 3];
        for (j, row) in states.iter_mut().enumerate() {
            for (i, state) in row.iter_mut().enumerate() {
                if let Some(node) = world.node(cx + i as i32 - 1, cy + j as i32 - 1) {
                    *state = fog_state(node.flags);
                }
            }
        }

        let (bx, by) = view.origin(cx, cy);
        let cell = Rect::new(bx, by, TILE_SIZE, TILE_SIZE)
            .intersection(&Rect::new(0, 0, view.width as i32, view.height as i32));
        let flat = states.iter().flatten().all(|&s| s == centre);

        // each half of the cell blends towards the neighbour on that side
        let half = |p: i32| -> (usize, usize, i32) {
            if p < TILE_SIZE / 2 {
                (0, 1, p + TILE_SIZE / 2)
            } else {
                (1, 2, p - TILE_SIZE / 2)
            }
        };

        for (x, y) in cell.points() {
            let value = if flat {
                centre
            } else {
                let (c0, c1, wx) = half(x - bx);
                let (r0, r1, wy) = half(y - by);
                let s = |r: usize, c: usize| states[r][c] as i32;
                let upper = s(r0, c0) * (TILE_SIZE - wx) + s(r0, c1) * wx;
                let lower = s(r1, c0) * (TILE_SIZE - wx) + s(r1, c1) * wx;
                ((upper * (TILE_SIZE - wy) + lower * wy) / (TILE_SIZE * TILE_SIZE)) as u8
            };
            self.fog[y as usize * view.width + x as usize] = value;
        }
    }

    fn update_object_palettes(&mut self, classes: &ObstacleClasses) {
        let tint = tint_color(&self.lighting);
        let (brightness, contrast) = (self.lighting.brightness, self.lighting.contrast);
        for (file, sprite) in classes.sprites() {
            let palette = self.object_palettes.entry(file.to_string()).or_insert_with(|| {
                let base = sprite.palette().cloned().unwrap_or_else(Palette::grayscale);
                CompoundPalette::new(&base)
            });
            palette.update_palettes(tint, brightness, contrast);
        }
    }

    fn enqueue_objects<'q>(
        &'q self,
        queue: &mut DrawQueue<'q>,
        world: &World,
        classes: &'q ObstacleClasses,
        view: &View,
        cells: Rect,
    ) {
        let mut drawn = HashSet::new();
        for (x, y) in cells.points() {
            let Some(node) = world.node(x, y) else {
                continue;
            };
            for &handle in &node.objects {
                if !drawn.insert(handle) {
                    continue;
                }
                let Some(object) = world.get(handle) else {
                    continue;
                };
                match &object.kind {
                    MapObjectKind::Obstacle(obstacle) => {
                        self.enqueue_obstacle(queue, world, classes, view, object.position(), obstacle)
                    }
                }
            }
        }
    }

    /// Queues an obstacle billboard and its shadow. Anything missing (class,
    /// sprite, frame, palette) skips the draw.
    fn enqueue_obstacle<'q>(
        &'q self,
        queue: &mut DrawQueue<'q>,
        world: &World,
        classes: &'q ObstacleClasses,
        view: &View,
        position: Rect,
        obstacle: &Obstacle,
    ) {
        let Some(class) = classes.get(obstacle.class) else {
            return;
        };
        let (Some(sprite), Some(file)) = (classes.sprite(class), class.file.as_ref()) else {
            return;
        };
        let Some(palette) = self
            .object_palettes
            .get(file)
            .and_then(|p| p.palette(OBJECT_LIGHT_LEVEL))
        else {
            return;
        };
        let Some(frame) = class.frames.get(obstacle.frame).map(|f| f.frame) else {
            return;
        };
        if frame >= sprite.frame_count() {
            return;
        }

        let (fw, fh) = (sprite.width(frame) as f32, sprite.height(frame) as f32);
        let (ox, oy) = view.origin(position.x, position.y);
        let lift = world.height_at(position.x as f32 + 0.5, position.y as f32 + 0.5);
        let x = ox + TILE_SIZE / 2;
        let y = oy + TILE_SIZE / 2 - lift as i32;

        let draw_x = x - (class.center_x * fw) as i32;
        let draw_y = y - (class.center_y * fh) as i32;
        let shadow_x = draw_x - (((0.3 * fh) as i32) as f32 * (1.0 - class.center_y)) as i32;
        let (offset, power) = (self.config.shadow_offset, self.config.shadow_power);

        queue.push(y, move |ctx: &mut DrawContext| {
            sprite.draw(ctx, draw_x, draw_y, frame, palette)
        });
        queue.push(y - SHADOW_WEIGHT_OFFSET, move |ctx: &mut DrawContext| {
            sprite.draw_shadow(ctx, shadow_x, draw_y, frame, offset, power)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        level::AlmLevel,
        registry::{Registry, RegistryValue, RegistryWriter},
        rle::RleFormat,
        screen::Screen,
        sprite::{Sprite, SpriteFrame},
    };

    /// Grey ramp tile image whose texel `(x, y)` has index `(x + y) % 256`.
    fn ramp_tiles(rows: usize) -> TileSet {
        let mut image = ImagePaletted::new(32, 32 * rows);
        for (i, p) in image.pixels_mut().iter_mut().enumerate() {
            *p = ((i % 32 + i / 32) % 256) as u8;
        }
        let mut tiles = TileSet::new();
        tiles.insert(0, 0, image);
        tiles
    }

    fn solid_tiles(index: u8) -> TileSet {
        let mut image = ImagePaletted::new(32, 32);
        image.pixels_mut().fill(index);
        let mut tiles = TileSet::new();
        tiles.insert(0, 0, image);
        tiles
    }

    fn renderer(fog: bool) -> MapRenderer {
        let config = RenderConfig {
            fog,
            ..Default::default()
        };
        MapRenderer::new(&config, LightingConfig::default())
    }

    fn clear_flags(world: &mut World) {
        for (x, y) in world.bounds().points() {
            if let Some(node) = world.node_mut(x, y) {
                node.flags
                    .remove(NodeFlags::NEED_REDRAW | NodeFlags::NEED_REDRAW_FOG);
            }
        }
    }

    fn grey(v: u8) -> Color {
        Color::rgb(v, v, v)
    }

    #[test]
    fn queue_runs_by_weight_then_insertion() {
        let order = std::cell::RefCell::new(Vec::new());
        let mut queue = DrawQueue::new();
        for (weight, tag) in [(5, 'a'), (-1, 'b'), (5, 'c'), (0, 'd')] {
            let order = &order;
            queue.push(weight, move |_: &mut DrawContext| order.borrow_mut().push(tag));
        }
        assert_eq!(queue.len(), 4);

        let mut screen = Screen::new(1, 1);
        queue.flush(&mut screen.context());
        assert_eq!(order.into_inner(), vec!['b', 'd', 'a', 'c']);
    }

    #[test]
    fn flat_map_reproduces_tiles() {
        let mut world = World::new(4, 4);
        for (x, y) in world.bounds().points() {
            world.node_mut(x, y).unwrap().tile = TileId::new(0, 0, 1);
        }
        world.reveal_all();
        let mut tiles = ramp_tiles(2);
        let mut screen = Screen::new(64, 64);

        renderer(true).render(
            &mut screen.context(),
            &mut world,
            &mut tiles,
            &ObstacleClasses::default(),
            (0, 0),
        );

        for (x, y) in [(0, 0), (5, 9), (31, 31), (40, 3), (63, 63)] {
            let expected = ((x % 32 + 32 + y % 32) % 256) as u8;
            assert_eq!(screen.pixel(x, y), Some(grey(expected)), "at ({}, {})", x, y);
        }
    }

    #[test]
    fn dirty_bits_are_exhausted_inside_the_view_only() {
        let mut world = World::new(16, 16);
        let mut tiles = solid_tiles(1);
        let mut screen = Screen::new(64, 64);
        renderer(true).render(
            &mut screen.context(),
            &mut world,
            &mut tiles,
            &ObstacleClasses::default(),
            (2, 2),
        );

        let dirty = NodeFlags::NEED_REDRAW | NodeFlags::NEED_REDRAW_FOG;
        for (x, y) in world.bounds().points() {
            let flags = world.node(x, y).unwrap().flags;
            let visible = (2..4).contains(&x) && (0..8).contains(&y);
            assert_eq!(!flags.intersects(dirty), visible, "node ({}, {})", x, y);
        }
    }

    #[test]
    fn scrolling_reuses_cached_cells() {
        let mut world = World::new(8, 16);
        world.reveal_all();
        clear_flags(&mut world);
        let classes = ObstacleClasses::default();
        let mut renderer = renderer(true);
        let mut screen = Screen::new(96, 320);

        renderer.render(&mut screen.context(), &mut world, &mut solid_tiles(10), &classes, (0, 0));
        assert_eq!(screen.pixel(40, 140), Some(grey(10)));

        // anything drawn from now on comes out in the new shade
        let mut tiles = solid_tiles(20);
        renderer.render(&mut screen.context(), &mut world, &mut tiles, &classes, (1, 0));

        // node (2, 4) was well inside the old view and moved left by a cell
        assert_eq!(screen.pixel(40, 140), Some(grey(10)));
        // node (3, 4) scrolled in
        assert_eq!(screen.pixel(70, 140), Some(grey(20)));
        // node (1, 0) sat near the old top edge
        assert_eq!(screen.pixel(5, 5), Some(grey(20)));
        assert_eq!(renderer.frames(), 2);
    }

    #[test]
    fn fog_blends_towards_neighbours() {
        let mut world = World::new(4, 4);
        world.set_visible(1, 1, true);
        world.set_visible(3, 0, true);
        world.set_visible(3, 0, false);
        let mut tiles = solid_tiles(255);
        let mut screen = Screen::new(128, 128);
        renderer(true).render(
            &mut screen.context(),
            &mut world,
            &mut tiles,
            &ObstacleClasses::default(),
            (0, 0),
        );

        assert_eq!(screen.pixel(48, 48), Some(grey(255)));
        assert_eq!(screen.pixel(32, 48), Some(grey(127)));
        assert_eq!(screen.pixel(112, 112), Some(grey(0)));
        // a lone discovered corner node, with out-of-map neighbours copying it
        assert_eq!(screen.pixel(127, 0), Some(grey(128)));
    }

    #[test]
    fn obstacles_draw_over_terrain() {
        let mut w = RegistryWriter::new();
        for (path, value) in [
            ("Global/ObjectCount", RegistryValue::Integer(1)),
            ("Global/FileCount", RegistryValue::Integer(1)),
            ("Files/File0", RegistryValue::String("rock".into())),
            ("Object0/ID", RegistryValue::Integer(3)),
            ("Object0/File", RegistryValue::Integer(0)),
        ] {
            w.set(path, value).unwrap();
        }
        let mut classes =
            ObstacleClasses::from_registry(&Registry::parse(&w.to_bytes().unwrap()).unwrap());

        let mut pal = Palette::grayscale();
        pal.set(1, Color::rgb(255, 0, 0));
        let frame = SpriteFrame::new(2, 2, vec![0x02, 1, 1, 0x02, 1, 1]);
        let sprite = Sprite::new(RleFormat::Indexed256, vec![frame], Some(pal.clone())).unwrap();
        classes.insert_sprite("rock", sprite);

        let mut level = AlmLevel::new(3, 3).unwrap();
        level.obstacles[4] = 3;
        let mut world = World::from_level(&level, &classes);
        let mut tiles = solid_tiles(200);
        let mut screen = Screen::new(96, 96);
        renderer(false).render(&mut screen.context(), &mut world, &mut tiles, &classes, (0, 0));

        let mut lit = CompoundPalette::new(&pal);
        lit.update_palettes(Color::WHITE, 255, 255);
        let red = lit.palette(OBJECT_LIGHT_LEVEL).unwrap()[1];
        assert_eq!(screen.pixel(47, 47), Some(red));
        assert_eq!(screen.pixel(48, 48), Some(red));
        // the shadow's top row is skewed right
        assert_eq!(screen.pixel(79, 47), Some(grey(100)));
        assert_eq!(screen.pixel(10, 10), Some(grey(200)));
    }
}

//! Obstacle classes from `graphics/objects/objects.reg` and the sprites they
//! reference.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{
    error::Result,
    registry::{Registry, RegistryValue},
    resources::ResourceManager,
    sprite::Sprite,
};

pub const OBJECTS_REGISTRY: &str = "graphics/objects/objects.reg";

/// One animation step. `time` is the number of fixed ticks the frame is
/// held for; `None` never advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationFrame {
    pub time: Option<u32>,
    pub frame: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleClass {
    pub id: i32,
    pub desc_text: String,
    /// Anchor inside the sprite frame, as a fraction of its size.
    pub center_x: f32,
    pub center_y: f32,
    pub frames: Vec<AnimationFrame>,
    pub dead_object: i32,
    /// Sprite path relative to `graphics/objects`, without extension.
    pub file: Option<String>,
}

impl ObstacleClass {
    pub fn sprite_path(&self) -> Option<String> {
        self.file
            .as_ref()
            .map(|f| format!("graphics/objects/{}.256", f.replace('\\', "/")))
    }
}

#[derive(Default)]
struct RawClass {
    desc_text: RegistryValue,
    id: RegistryValue,
    file: RegistryValue,
    phases: RegistryValue,
    index: RegistryValue,
    animation_time: RegistryValue,
    animation_frame: RegistryValue,
    center_x: RegistryValue,
    center_y: RegistryValue,
    width: RegistryValue,
    height: RegistryValue,
    dead_object: RegistryValue,
    parent: RegistryValue,
}

impl RawClass {
    fn read(reg: &Registry, n: usize) -> Self {
        let get = |key: &str| reg.get_value(&format!("Object{}/{}", n, key)).clone();
        Self {
            desc_text: get("DescText"),
            id: get("ID"),
            file: get("File"),
            phases: get("Phases"),
            index: get("Index"),
            animation_time: get("AnimationTime"),
            animation_frame: get("AnimationFrame"),
            center_x: get("CenterX"),
            center_y: get("CenterY"),
            width: get("Width"),
            height: get("Height"),
            dead_object: get("DeadObject"),
            parent: get("Parent"),
        }
    }

    fn inherit(&mut self, parent: &RawClass) {
        for (field, from) in [
            (&mut self.desc_text, &parent.desc_text),
            (&mut self.file, &parent.file),
            (&mut self.phases, &parent.phases),
            (&mut self.index, &parent.index),
            (&mut self.animation_time, &parent.animation_time),
            (&mut self.animation_frame, &parent.animation_frame),
            (&mut self.center_x, &parent.center_x),
            (&mut self.center_y, &parent.center_y),
            (&mut self.width, &parent.width),
            (&mut self.height, &parent.height),
            (&mut self.dead_object, &parent.dead_object),
        ] {
            if !field.is_present() {
                *field = from.clone();
            }
        }
    }
}

/// Every obstacle class plus the sprites they draw with.
#[derive(Default)]
pub struct ObstacleClasses {
    classes: Vec<ObstacleClass>,
    by_id: HashMap<i32, usize>,
    sprites: HashMap<String, Sprite>,
}

impl ObstacleClasses {
    pub fn load(resources: &ResourceManager) -> Result<Self> {
        let reg = Registry::load(resources, OBJECTS_REGISTRY)?;
        Ok(Self::from_registry(&reg))
    }

    pub fn from_registry(reg: &Registry) -> Self {
        let count = reg.get_value("Global/ObjectCount").as_integer().max(0) as usize;
        let file_count = reg.get_value("Global/FileCount").as_integer();

        let raw: Vec<RawClass> = (0..count).map(|n| RawClass::read(reg, n)).collect();
        let mut classes = Vec::with_capacity(count);

        for (n, own) in raw.iter().enumerate() {
            let mut class = RawClass {
                id: own.id.clone(),
                ..Default::default()
            };
            class.inherit(own);

            // walk the parent chain, each level only filling what is still absent
            let mut parent = own.parent.clone();
            let mut depth = 0;
            while parent.is_present() {
                depth += 1;
                if depth > count {
                    warn!("Object{}: parent chain loops", n);
                    break;
                }
                let parent_id = parent.as_integer();
                let Some(p) = raw.iter().find(|r| r.id.is_present() && r.id.as_integer() == parent_id) else {
                    warn!("Object{}: parent {} not found", n, parent_id);
                    break;
                };
                class.inherit(p);
                parent = p.parent.clone();
            }

            classes.push(Self::resolve(n, &class, reg, file_count));
        }

        let mut by_id = HashMap::new();
        for (i, class) in classes.iter().enumerate() {
            by_id.entry(class.id).or_insert(i);
        }
        debug!("loaded {} obstacle classes", classes.len());

        Self {
            classes,
            by_id,
            sprites: HashMap::new(),
        }
    }

    fn resolve(n: usize, raw: &RawClass, reg: &Registry, file_count: i32) -> ObstacleClass {
        let id = if raw.id.is_present() { raw.id.as_integer() } else { -1 };
        let dead_object = if raw.dead_object.is_present() {
            raw.dead_object.as_integer()
        } else {
            -1
        };

        let (mut center_x, mut center_y) = (0.5, 0.5);
        if raw.center_x.is_present() && raw.center_y.is_present() && raw.width.is_present() && raw.height.is_present() {
            let (w, h) = (raw.width.as_float(), raw.height.as_float());
            if w != 0.0 && h != 0.0 {
                center_x = (raw.center_x.as_float() / w) as f32;
                center_y = (raw.center_y.as_float() / h) as f32;
            }
        }

        let phase_index = (raw.index.as_integer() * raw.phases.as_integer()).max(0) as usize;
        let frames = if raw.animation_time.is_present() && raw.animation_frame.is_present() {
            let times = raw.animation_time.as_array();
            let indices = raw.animation_frame.as_array();
            if times.len() == indices.len() {
                times
                    .iter()
                    .zip(indices.iter())
                    .map(|(&time, &frame)| AnimationFrame {
                        time: u32::try_from(time).ok(),
                        frame: (frame.max(0) as usize) + phase_index,
                    })
                    .collect()
            } else {
                warn!(
                    "Object{}: {} animation times for {} frames",
                    n,
                    times.len(),
                    indices.len()
                );
                Vec::new()
            }
        } else {
            vec![AnimationFrame {
                time: None,
                frame: phase_index,
            }]
        };

        let file_index = raw.file.as_integer();
        let file = if raw.file.is_present() && file_index >= 0 && file_index < file_count {
            let path = reg.get_value(&format!("Files/File{}", file_index)).as_str().into_owned();
            (!path.is_empty()).then_some(path)
        } else {
            None
        };
        if file.is_none() {
            warn!("Object{}: no valid sprite file ({})", n, file_index);
        }

        ObstacleClass {
            id,
            desc_text: raw.desc_text.as_str().into_owned(),
            center_x,
            center_y,
            frames,
            dead_object,
            file,
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObstacleClass> {
        self.classes.iter()
    }

    /// Index of the first class carrying `id`.
    pub fn index_of(&self, id: i32) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn get(&self, index: usize) -> Option<&ObstacleClass> {
        self.classes.get(index)
    }

    pub fn get_by_id(&self, id: i32) -> Option<&ObstacleClass> {
        self.index_of(id).and_then(|i| self.get(i))
    }

    /// Loads the sprite of every class with a file; a missing sprite fails
    /// the whole load.
    pub fn load_sprites(&mut self, resources: &ResourceManager) -> Result<()> {
        for class in &self.classes {
            let (Some(file), Some(path)) = (&class.file, class.sprite_path()) else {
                continue;
            };
            if self.sprites.contains_key(file) {
                continue;
            }
            let sprite = Sprite::load(resources, &path)?;
            self.sprites.insert(file.clone(), sprite);
        }
        debug!("loaded {} obstacle sprites", self.sprites.len());
        Ok(())
    }

    pub fn insert_sprite(&mut self, file: &str, sprite: Sprite) {
        self.sprites.insert(file.to_string(), sprite);
    }

    pub fn sprite(&self, class: &ObstacleClass) -> Option<&Sprite> {
        class.file.as_ref().and_then(|f| self.sprites.get(f))
    }

    /// Loaded sprites keyed by file.
    pub fn sprites(&self) -> impl Iterator<Item = (&str, &Sprite)> {
        self.sprites.iter().map(|(k, v)| (k.as_str(), v))
    }
}

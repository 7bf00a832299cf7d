//! Binary world snapshots.
//!
//! A snapshot captures the full state of one world into a caller-provided
//! stream: a fixed header, the entity-table metadata, then one chunk per
//! registered non-empty component pool, encoded by that type's registered
//! formatter. All integers are little-endian.
//!
//! Layout:
//!
//! ```text
//! [0..4]   magic = "ZECS"
//! [4..6]   format_version: u16        (currently 1)
//! [6..7]   flags: u8                  (bit 0 = ignore unknown chunks)
//! [7..8]   reserved
//! [8..12]  world_header_len: u32
//! [ .. ]   next_id: u32, alive_count: u32,
//!          generation[slot_count]: u32,
//!          free_ids[free_count]: u32,
//!          alive_bits: u64 × ceil(slot_count / 64)
//! [ .. ]   per chunk: stable_id_len: u16, stable_id, formatter_version: u16,
//!          count: u32, payload_len: u64, payload
//! [ .. ]   end marker: stable_id_len = 0
//! ```
//!
//! Loading is staged: the stream is fully parsed and the pools rebuilt on
//! the side before anything touches the world, so a failed load leaves the
//! world exactly as it was. Post-load migrations run afterwards against
//! the public API.

use std::io::{Read, Write};
use std::marker::PhantomData;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::component::{self, Component, ComponentTypeId};
use crate::entity::Entity;
use crate::error::EcsError;
use crate::sparse_set::ComponentPool;
use crate::world::World;

const MAGIC: [u8; 4] = *b"ZECS";
const FORMAT_VERSION: u16 = 1;
const FLAG_IGNORE_UNKNOWN: u8 = 0b0000_0001;

/// Options controlling snapshot writing.
#[derive(Clone, Copy, Default, Debug)]
pub struct SnapshotOptions {
    /// Record the ignore-unknown flag so loaders skip chunks for stable
    /// ids they do not know instead of failing.
    pub ignore_unknown: bool,
}

/// Read-only view of one pool handed to formatters on save.
pub struct PoolView<'a> {
    pool: &'a ComponentPool,
}

impl PoolView<'_> {
    /// Iterates `(entity, value)` pairs in dense order.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the pool's component type; a formatter is only
    /// ever handed the pool it was registered for.
    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.pool.typed::<T>().iter()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// Write half of a pool being rebuilt during load.
///
/// Inserts resolve the entity's restored generation from the staged
/// metadata, so formatters only deal in raw ids.
pub struct PoolLoad<'a> {
    pool: &'a mut ComponentPool,
    generations: &'a [u32],
    alive: &'a [bool],
}

impl PoolLoad<'_> {
    /// Inserts a value for the entity id recorded in the chunk.
    pub fn insert<T: Component>(&mut self, id: u32, value: T) -> Result<(), EcsError> {
        if !self.alive.get(id as usize).copied().unwrap_or(false) {
            return Err(EcsError::SnapshotFormat {
                message: format!("chunk names entity id {id} which is not alive"),
            });
        }
        let generation = self.generations[id as usize];
        self.pool.insert(Entity::from_parts(id, generation), value);
        Ok(())
    }
}

/// Codec between one component pool and snapshot chunk payloads.
///
/// Exactly one *latest* formatter exists per type (enforced at
/// registration); additional versions are legacy readers selected by the
/// chunk's `formatter_version` field.
pub trait PoolFormatter: Send + Sync {
    /// The chunk version this formatter produces and consumes.
    fn version(&self) -> u16;

    /// Emits `(entity id, value)` pairs into `out`; returns the pair count.
    fn write(&self, pool: PoolView<'_>, out: &mut Vec<u8>) -> Result<u32, EcsError>;

    /// Rebuilds `count` pairs from `input` into the staged pool.
    fn read(
        &self,
        load: &mut PoolLoad<'_>,
        count: u32,
        input: &mut &[u8],
    ) -> Result<(), EcsError>;
}

/// A [`PoolFormatter`] from a pair of per-value encode/decode closures.
///
/// Handles the `(entity_id: u32, value)` pair framing; the closures only
/// see the value bytes.
///
/// # Example
///
/// ```ignore
/// let formatter = ComponentFormatter::<Position, _, _>::new(
///     1,
///     |value, out| {
///         out.write_f32::<LittleEndian>(value.x).map_err(stream_error)?;
///         out.write_f32::<LittleEndian>(value.y).map_err(stream_error)
///     },
///     |input| {
///         Ok(Position {
///             x: input.read_f32::<LittleEndian>().map_err(stream_error)?,
///             y: input.read_f32::<LittleEndian>().map_err(stream_error)?,
///         })
///     },
/// );
/// ```
pub struct ComponentFormatter<T, E, D> {
    version: u16,
    encode: E,
    decode: D,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E, D> ComponentFormatter<T, E, D>
where
    T: Component,
    E: Fn(&T, &mut Vec<u8>) -> Result<(), EcsError> + Send + Sync,
    D: Fn(&mut &[u8]) -> Result<T, EcsError> + Send + Sync,
{
    pub fn new(version: u16, encode: E, decode: D) -> Self {
        Self {
            version,
            encode,
            decode,
            _marker: PhantomData,
        }
    }
}

impl<T, E, D> PoolFormatter for ComponentFormatter<T, E, D>
where
    T: Component,
    E: Fn(&T, &mut Vec<u8>) -> Result<(), EcsError> + Send + Sync,
    D: Fn(&mut &[u8]) -> Result<T, EcsError> + Send + Sync,
{
    fn version(&self) -> u16 {
        self.version
    }

    fn write(&self, pool: PoolView<'_>, out: &mut Vec<u8>) -> Result<u32, EcsError> {
        let mut count = 0u32;
        for (entity, value) in pool.iter::<T>() {
            out.write_u32::<LittleEndian>(entity.id())
                .map_err(|err| stream_error("chunk payload", err))?;
            (self.encode)(value, out)?;
            count += 1;
        }
        Ok(count)
    }

    fn read(
        &self,
        load: &mut PoolLoad<'_>,
        count: u32,
        input: &mut &[u8],
    ) -> Result<(), EcsError> {
        for _ in 0..count {
            let id = input
                .read_u32::<LittleEndian>()
                .map_err(|err| stream_error("chunk payload", err))?;
            let value = (self.decode)(input)?;
            load.insert(id, value)?;
        }
        Ok(())
    }
}

/// Maps an I/O failure into the snapshot error surface.
pub fn stream_error(context: &str, err: std::io::Error) -> EcsError {
    EcsError::SnapshotFormat {
        message: format!("{context}: {err}"),
    }
}

/// A transformation run after every snapshot load, in ascending
/// `(order, registration order)`. Migrations get `&mut World` and may use
/// the regular command API.
pub trait PostLoadMigration: Send + 'static {
    /// Sort key; lower runs earlier.
    fn order(&self) -> i32 {
        0
    }

    fn migrate(&mut self, world: &mut World) -> Result<(), EcsError>;
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

struct StagedWorld {
    next_id: u32,
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
    pools: Vec<(ComponentTypeId, ComponentPool)>,
}

fn parse_snapshot(input: &mut dyn Read) -> Result<StagedWorld, EcsError> {
    let mut magic = [0u8; 4];
    input
        .read_exact(&mut magic)
        .map_err(|err| stream_error("magic", err))?;
    if magic != MAGIC {
        return Err(EcsError::SnapshotFormat {
            message: format!("bad magic {magic:02x?}"),
        });
    }

    let version = input
        .read_u16::<LittleEndian>()
        .map_err(|err| stream_error("format version", err))?;
    if version != FORMAT_VERSION {
        return Err(EcsError::SnapshotFormat {
            message: format!("unsupported format version {version}"),
        });
    }

    let flags = input.read_u8().map_err(|err| stream_error("flags", err))?;
    let ignore_unknown = flags & FLAG_IGNORE_UNKNOWN != 0;
    let _reserved = input.read_u8().map_err(|err| stream_error("reserved", err))?;

    let header_len = input
        .read_u32::<LittleEndian>()
        .map_err(|err| stream_error("world header length", err))? as usize;

    // -- World metadata --

    let next_id = input
        .read_u32::<LittleEndian>()
        .map_err(|err| stream_error("next_id", err))?;
    let alive_count = input
        .read_u32::<LittleEndian>()
        .map_err(|err| stream_error("alive_count", err))?;

    let slot_count = next_id as usize;
    let words = slot_count.div_ceil(64);
    let fixed = 8 + 4 * slot_count + 8 * words;
    if header_len < fixed || (header_len - fixed) % 4 != 0 {
        return Err(EcsError::SnapshotFormat {
            message: format!("inconsistent world header length {header_len}"),
        });
    }
    let free_count = (header_len - fixed) / 4;

    let mut generations = Vec::with_capacity(slot_count);
    for _ in 0..slot_count {
        generations.push(
            input
                .read_u32::<LittleEndian>()
                .map_err(|err| stream_error("generation table", err))?,
        );
    }

    let mut free = Vec::with_capacity(free_count);
    for _ in 0..free_count {
        free.push(
            input
                .read_u32::<LittleEndian>()
                .map_err(|err| stream_error("free list", err))?,
        );
    }

    let mut alive = vec![false; slot_count];
    for word_idx in 0..words {
        let word = input
            .read_u64::<LittleEndian>()
            .map_err(|err| stream_error("alive bits", err))?;
        for bit in 0..64 {
            let idx = word_idx * 64 + bit;
            if idx < slot_count && word & (1u64 << bit) != 0 {
                alive[idx] = true;
            }
        }
    }

    let restored_alive = alive.iter().filter(|&&a| a).count() as u32;
    if restored_alive != alive_count {
        return Err(EcsError::SnapshotFormat {
            message: format!(
                "alive_count says {alive_count} but the bitset holds {restored_alive}"
            ),
        });
    }

    // -- Component chunks --

    let mut pools = Vec::new();
    loop {
        let stable_id_len = input
            .read_u16::<LittleEndian>()
            .map_err(|err| stream_error("chunk header", err))? as usize;
        if stable_id_len == 0 {
            break;
        }

        let mut stable_id_bytes = vec![0u8; stable_id_len];
        input
            .read_exact(&mut stable_id_bytes)
            .map_err(|err| stream_error("stable id", err))?;
        let stable_id = String::from_utf8(stable_id_bytes).map_err(|_| {
            EcsError::SnapshotFormat {
                message: "stable id is not valid utf-8".to_string(),
            }
        })?;

        let chunk_version = input
            .read_u16::<LittleEndian>()
            .map_err(|err| stream_error("formatter version", err))?;
        let count = input
            .read_u32::<LittleEndian>()
            .map_err(|err| stream_error("chunk count", err))?;
        let payload_len = input
            .read_u64::<LittleEndian>()
            .map_err(|err| stream_error("payload length", err))? as usize;

        let mut payload = vec![0u8; payload_len];
        input
            .read_exact(&mut payload)
            .map_err(|err| stream_error("chunk payload", err))?;

        let Some(type_id) = component::component_id_by_stable(&stable_id) else {
            if ignore_unknown {
                log::debug!("snapshot: skipping unknown component chunk `{stable_id}`");
                continue;
            }
            return Err(EcsError::UnknownComponentType { stable_id });
        };

        let formatter = component::formatter_for(type_id, chunk_version).ok_or_else(|| {
            EcsError::SnapshotFormat {
                message: format!("no formatter for `{stable_id}` chunk version {chunk_version}"),
            }
        })?;

        let mut pool = component::new_pool(type_id).ok_or_else(|| EcsError::SnapshotFormat {
            message: format!("registry lost entry for `{stable_id}` mid-load"),
        })?;

        let mut slice: &[u8] = &payload;
        {
            let mut load = PoolLoad {
                pool: &mut pool,
                generations: &generations,
                alive: &alive,
            };
            formatter.read(&mut load, count, &mut slice)?;
        }
        if !slice.is_empty() {
            return Err(EcsError::SnapshotFormat {
                message: format!(
                    "`{stable_id}` chunk has {} trailing byte(s)",
                    slice.len()
                ),
            });
        }
        if pool.len() != count as usize {
            return Err(EcsError::SnapshotFormat {
                message: format!(
                    "`{stable_id}` chunk declared {count} pairs but rebuilt {}",
                    pool.len()
                ),
            });
        }

        pools.push((type_id, pool));
    }

    // Singleton invariant must hold before the staged state may replace
    // the world.
    for (type_id, pool) in &pools {
        if component::is_singleton(*type_id) && pool.len() > 1 {
            return Err(EcsError::SnapshotFormat {
                message: format!(
                    "singleton `{}` has {} owners in the stream",
                    component::stable_id_or_unknown(*type_id),
                    pool.len()
                ),
            });
        }
    }

    Ok(StagedWorld {
        next_id,
        generations,
        alive,
        free,
        pools,
    })
}

// ---------------------------------------------------------------------------
// World entry points
// ---------------------------------------------------------------------------

impl World {
    /// Writes a full snapshot of this world into `out`.
    ///
    /// The stream is neither owned nor closed; on error it may be left
    /// partially written and the caller decides whether to truncate.
    pub fn save_snapshot(
        &self,
        out: &mut dyn Write,
        options: SnapshotOptions,
    ) -> Result<(), EcsError> {
        out.write_all(&MAGIC)
            .map_err(|err| stream_error("magic", err))?;
        out.write_u16::<LittleEndian>(FORMAT_VERSION)
            .map_err(|err| stream_error("format version", err))?;
        let flags = if options.ignore_unknown {
            FLAG_IGNORE_UNKNOWN
        } else {
            0
        };
        out.write_u8(flags).map_err(|err| stream_error("flags", err))?;
        out.write_u8(0).map_err(|err| stream_error("reserved", err))?;

        // -- World metadata --

        let next_id = self.entities.slot_count();
        let slot_count = next_id as usize;
        let slots = self.entities.slots();
        let free = self.entities.free_list();
        let words = slot_count.div_ceil(64);

        let mut metadata = Vec::with_capacity(8 + 4 * slot_count + 4 * free.len() + 8 * words);
        metadata
            .write_u32::<LittleEndian>(next_id)
            .map_err(|err| stream_error("next_id", err))?;
        metadata
            .write_u32::<LittleEndian>(self.entities.alive_count())
            .map_err(|err| stream_error("alive_count", err))?;
        for idx in 0..slot_count {
            let generation = slots.get(idx).map(|slot| slot.generation).unwrap_or(0);
            metadata
                .write_u32::<LittleEndian>(generation)
                .map_err(|err| stream_error("generation table", err))?;
        }
        for &id in &free {
            metadata
                .write_u32::<LittleEndian>(id)
                .map_err(|err| stream_error("free list", err))?;
        }
        for word_idx in 0..words {
            let mut word = 0u64;
            for bit in 0..64 {
                let idx = word_idx * 64 + bit;
                if slots.get(idx).is_some_and(|slot| slot.alive) {
                    word |= 1u64 << bit;
                }
            }
            metadata
                .write_u64::<LittleEndian>(word)
                .map_err(|err| stream_error("alive bits", err))?;
        }

        out.write_u32::<LittleEndian>(metadata.len() as u32)
            .map_err(|err| stream_error("world header length", err))?;
        out.write_all(&metadata)
            .map_err(|err| stream_error("world metadata", err))?;

        // -- Component chunks, in registry order --

        for idx in 0..component::registered_count() {
            let type_id = ComponentTypeId(idx);
            let Some(pool) = self.pool(type_id) else {
                continue;
            };
            if pool.is_empty() {
                continue;
            }
            let stable_id = component::stable_id_or_unknown(type_id);
            let Some((version, formatter)) = component::latest_formatter(type_id) else {
                return Err(EcsError::SnapshotFormat {
                    message: format!("`{stable_id}` has data but no latest formatter"),
                });
            };

            let mut payload = Vec::new();
            let count = formatter.write(PoolView { pool }, &mut payload)?;

            out.write_u16::<LittleEndian>(stable_id.len() as u16)
                .map_err(|err| stream_error("chunk header", err))?;
            out.write_all(stable_id.as_bytes())
                .map_err(|err| stream_error("stable id", err))?;
            out.write_u16::<LittleEndian>(version)
                .map_err(|err| stream_error("formatter version", err))?;
            out.write_u32::<LittleEndian>(count)
                .map_err(|err| stream_error("chunk count", err))?;
            out.write_u64::<LittleEndian>(payload.len() as u64)
                .map_err(|err| stream_error("payload length", err))?;
            out.write_all(&payload)
                .map_err(|err| stream_error("chunk payload", err))?;
        }

        out.write_u16::<LittleEndian>(0)
            .map_err(|err| stream_error("end marker", err))?;
        Ok(())
    }

    /// Replaces this world's entities and pools from a snapshot stream,
    /// then runs post-load migrations.
    ///
    /// Parsing and pool rebuilding happen on the side; any failure before
    /// the swap leaves the world in its pre-load state.
    pub fn load_snapshot(&mut self, input: &mut dyn Read) -> Result<(), EcsError> {
        let staged = parse_snapshot(input)?;

        self.prepare_for_load();
        self.restore_entity_table(&staged.generations, &staged.alive, &staged.free, staged.next_id);
        self.install_pools(staged.pools);
        self.rebuild_singleton_owners();

        self.run_post_load_migrations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Registration;

    #[derive(Clone, PartialEq, Debug)]
    struct SnapPos {
        x: f32,
        y: f32,
    }

    #[derive(Clone, PartialEq, Debug)]
    struct SnapTag(u8);

    fn pos_formatter() -> ComponentFormatter<
        SnapPos,
        impl Fn(&SnapPos, &mut Vec<u8>) -> Result<(), EcsError> + Send + Sync,
        impl Fn(&mut &[u8]) -> Result<SnapPos, EcsError> + Send + Sync,
    > {
        ComponentFormatter::new(
            1,
            |value: &SnapPos, out: &mut Vec<u8>| {
                out.write_f32::<LittleEndian>(value.x)
                    .map_err(|err| stream_error("x", err))?;
                out.write_f32::<LittleEndian>(value.y)
                    .map_err(|err| stream_error("y", err))
            },
            |input: &mut &[u8]| {
                Ok(SnapPos {
                    x: input
                        .read_f32::<LittleEndian>()
                        .map_err(|err| stream_error("x", err))?,
                    y: input
                        .read_f32::<LittleEndian>()
                        .map_err(|err| stream_error("y", err))?,
                })
            },
        )
    }

    fn register() {
        Registration::<SnapPos>::new("test.snapshot.pos.v1")
            .latest_formatter(pos_formatter())
            .register()
            .unwrap();
        Registration::<SnapTag>::new("test.snapshot.tag.v1")
            .latest_formatter(ComponentFormatter::new(
                1,
                |value: &SnapTag, out: &mut Vec<u8>| {
                    out.write_u8(value.0).map_err(|err| stream_error("tag", err))
                },
                |input: &mut &[u8]| {
                    Ok(SnapTag(
                        input.read_u8().map_err(|err| stream_error("tag", err))?,
                    ))
                },
            ))
            .register()
            .unwrap();
    }

    #[test]
    fn round_trip_restores_entities_and_pools() {
        register();
        let mut world = World::new();
        let a = world.spawn();
        let b = world.spawn();
        let c = world.spawn();
        world.despawn(b).unwrap();
        world.add_component(a, SnapPos { x: 1.0, y: 2.0 }).unwrap();
        world.add_component(c, SnapPos { x: 3.0, y: 4.0 }).unwrap();
        world.add_component(c, SnapTag(7)).unwrap();

        let mut bytes = Vec::new();
        world
            .save_snapshot(&mut bytes, SnapshotOptions::default())
            .unwrap();

        let mut restored = World::new();
        restored.load_snapshot(&mut bytes.as_slice()).unwrap();

        assert_eq!(restored.alive_count(), 2);
        assert!(restored.is_alive(a));
        assert!(!restored.is_alive(b));
        assert!(restored.is_alive(c));
        assert_eq!(restored.generation_of(b.id()), world.generation_of(b.id()));
        assert_eq!(
            restored.try_read_component::<SnapPos>(a),
            Some(SnapPos { x: 1.0, y: 2.0 })
        );
        assert_eq!(restored.try_read_component::<SnapTag>(c), Some(SnapTag(7)));

        // The freed slot still recycles with the bumped generation.
        let reused = restored.spawn();
        assert_eq!(reused.id(), b.id());
        assert_ne!(reused.generation(), b.generation());
    }

    #[test]
    fn magic_is_zecs() {
        register();
        let world = World::new();
        let mut bytes = Vec::new();
        world
            .save_snapshot(&mut bytes, SnapshotOptions::default())
            .unwrap();
        assert_eq!(&bytes[0..4], b"ZECS");
        assert_eq!(&bytes[4..6], &[1, 0]); // version 1, little-endian
    }

    #[test]
    fn bad_magic_rejected() {
        let mut world = World::new();
        let bytes = b"NOPE\x01\x00\x00\x00".to_vec();
        let err = world.load_snapshot(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, EcsError::SnapshotFormat { .. }));
    }

    #[test]
    fn unsupported_version_rejected() {
        register();
        let world = World::new();
        let mut bytes = Vec::new();
        world
            .save_snapshot(&mut bytes, SnapshotOptions::default())
            .unwrap();
        bytes[4] = 99;

        let mut target = World::new();
        let err = target.load_snapshot(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, EcsError::SnapshotFormat { .. }));
    }

    #[test]
    fn truncated_stream_rejected_and_world_untouched() {
        register();
        let mut world = World::new();
        let e = world.spawn();
        world.add_component(e, SnapPos { x: 5.0, y: 6.0 }).unwrap();

        let mut bytes = Vec::new();
        world
            .save_snapshot(&mut bytes, SnapshotOptions::default())
            .unwrap();
        bytes.truncate(bytes.len() - 3);

        let mut target = World::new();
        let survivor = target.spawn();
        let err = target.load_snapshot(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, EcsError::SnapshotFormat { .. }));
        // Pre-load state is intact.
        assert!(target.is_alive(survivor));
        assert_eq!(target.alive_count(), 1);
    }

    #[test]
    fn load_replaces_previous_contents() {
        register();
        let mut source = World::new();
        let e = source.spawn();
        source.add_component(e, SnapTag(1)).unwrap();
        let mut bytes = Vec::new();
        source
            .save_snapshot(&mut bytes, SnapshotOptions::default())
            .unwrap();

        let mut target = World::new();
        for _ in 0..5 {
            target.spawn();
        }
        target.load_snapshot(&mut bytes.as_slice()).unwrap();
        assert_eq!(target.alive_count(), 1);
        assert_eq!(target.try_read_component::<SnapTag>(e), Some(SnapTag(1)));
    }

    /// Rotation stored in radians; legacy chunks carried whole degrees.
    #[derive(Clone, PartialEq, Debug)]
    struct SnapRot {
        radians: f32,
    }

    fn register_rot() {
        Registration::<SnapRot>::new("test.snapshot.rot.v1")
            .latest_formatter(ComponentFormatter::new(
                2,
                |value: &SnapRot, out: &mut Vec<u8>| {
                    out.write_f32::<LittleEndian>(value.radians)
                        .map_err(|err| stream_error("radians", err))
                },
                |input: &mut &[u8]| {
                    Ok(SnapRot {
                        radians: input
                            .read_f32::<LittleEndian>()
                            .map_err(|err| stream_error("radians", err))?,
                    })
                },
            ))
            .legacy_formatter(ComponentFormatter::new(
                1,
                |_value: &SnapRot, _out: &mut Vec<u8>| {
                    Err(EcsError::SnapshotFormat {
                        message: "v1 rotation chunks are read-only".to_string(),
                    })
                },
                |input: &mut &[u8]| {
                    let degrees = input
                        .read_u16::<LittleEndian>()
                        .map_err(|err| stream_error("degrees", err))?;
                    Ok(SnapRot {
                        radians: (degrees as f32).to_radians(),
                    })
                },
            ))
            .register()
            .unwrap();
    }

    /// Hand-builds a minimal stream with one alive entity and one chunk.
    fn stream_with_chunk(stable_id: &str, version: u16, payload: &[u8], count: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ZECS");
        bytes.write_u16::<LittleEndian>(1).unwrap();
        bytes.push(0); // flags
        bytes.push(0); // reserved

        // One slot at generation 1, alive, empty free list.
        let header_len = 8 + 4 + 8;
        bytes.write_u32::<LittleEndian>(header_len).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap(); // next_id
        bytes.write_u32::<LittleEndian>(1).unwrap(); // alive_count
        bytes.write_u32::<LittleEndian>(1).unwrap(); // generation[0]
        bytes.write_u64::<LittleEndian>(1).unwrap(); // alive bits

        bytes
            .write_u16::<LittleEndian>(stable_id.len() as u16)
            .unwrap();
        bytes.extend_from_slice(stable_id.as_bytes());
        bytes.write_u16::<LittleEndian>(version).unwrap();
        bytes.write_u32::<LittleEndian>(count).unwrap();
        bytes.write_u64::<LittleEndian>(payload.len() as u64).unwrap();
        bytes.extend_from_slice(payload);

        bytes.write_u16::<LittleEndian>(0).unwrap(); // end marker
        bytes
    }

    #[test]
    fn chunk_version_routes_to_legacy_formatter() {
        register_rot();

        // entity id 0, 90 degrees in the v1 encoding.
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(0).unwrap();
        payload.write_u16::<LittleEndian>(90).unwrap();
        let bytes = stream_with_chunk("test.snapshot.rot.v1", 1, &payload, 1);

        let mut world = World::new();
        world.load_snapshot(&mut bytes.as_slice()).unwrap();

        let entity = world.all_entities()[0];
        let rot = world.try_read_component::<SnapRot>(entity).unwrap();
        assert!((rot.radians - 90.0f32.to_radians()).abs() < 1e-6);

        // Saving re-encodes through the latest formatter.
        let mut saved = Vec::new();
        world
            .save_snapshot(&mut saved, SnapshotOptions::default())
            .unwrap();
        let mut reloaded = World::new();
        reloaded.load_snapshot(&mut saved.as_slice()).unwrap();
        assert_eq!(
            reloaded.try_read_component::<SnapRot>(entity),
            Some(rot)
        );
    }

    #[test]
    fn unknown_chunk_version_rejected() {
        register_rot();
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(0).unwrap();
        payload.write_u16::<LittleEndian>(90).unwrap();
        let bytes = stream_with_chunk("test.snapshot.rot.v1", 9, &payload, 1);

        let mut world = World::new();
        let err = world.load_snapshot(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, EcsError::SnapshotFormat { .. }));
    }

    #[test]
    fn save_without_formatter_fails() {
        #[derive(Clone, PartialEq, Debug)]
        struct Unformatted(u8);
        Registration::<Unformatted>::new("test.snapshot.unformatted.v1")
            .register()
            .unwrap();

        let mut world = World::new();
        let e = world.spawn();
        world.add_component(e, Unformatted(1)).unwrap();

        let mut bytes = Vec::new();
        let err = world
            .save_snapshot(&mut bytes, SnapshotOptions::default())
            .unwrap_err();
        assert!(matches!(err, EcsError::SnapshotFormat { .. }));
    }

    #[test]
    fn empty_world_round_trip() {
        register();
        let world = World::new();
        let mut bytes = Vec::new();
        world
            .save_snapshot(&mut bytes, SnapshotOptions::default())
            .unwrap();

        let mut restored = World::new();
        restored.load_snapshot(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.alive_count(), 0);
    }
}

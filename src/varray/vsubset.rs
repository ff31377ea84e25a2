//! Lazy virtual array subsets and the scatter/gather executor.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::{map_variants, BufferError, Element, TypedBuffer};
use crate::locks;
use crate::slicing::{Bounds, DimensionSelection, IndexExpr, SubsetSpec, TilePlan, TileSlot};

use super::{ArrayError, VArray, VArrayError};

/// Multiple mutable views into the aggregation buffer.
///
/// Gather workers write disjoint outer slices, so handing each worker a
/// mutable view is sound; it is the planner's partition guarantee that makes
/// it so.
#[derive(Copy, Clone)]
struct CellSlice<'a, T>(&'a [std::cell::UnsafeCell<T>]);

unsafe impl<T: Send + Sync> Send for CellSlice<'_, T> {}
unsafe impl<T: Send + Sync> Sync for CellSlice<'_, T> {}

impl<'a, T: Copy> CellSlice<'a, T> {
    fn new(slice: &'a mut [T]) -> Self {
        let ptr = slice as *mut [T] as *const [std::cell::UnsafeCell<T>];
        Self(unsafe { &*ptr })
    }

    /// # Safety
    /// Callers must not write to the same element from more than one thread.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut [T] {
        let ptr = self.0[0].get();
        std::slice::from_raw_parts_mut(ptr, self.0.len())
    }
}

/// A lazy subset of a [`VArray`].
///
/// Construction plans the affected tiles; no I/O happens and no buffer
/// exists until [`read`](Self::read), [`update`](Self::update) or
/// [`clear`](Self::clear) runs the plan on the client's worker pool.
///
/// If any per-tile operation fails, the overall operation fails with the
/// first error; other workers are cancelled at their next checkpoint, and
/// per-tile writes already committed stay committed.
#[derive(Debug)]
pub struct VSubset<'a> {
    varray: &'a VArray,
    expr: IndexExpr,
    spec: SubsetSpec,
    plan: TilePlan,
}

impl<'a> VSubset<'a> {
    pub(crate) fn new(
        varray: &'a VArray,
        expr: IndexExpr,
        spec: SubsetSpec,
        plan: TilePlan,
    ) -> Self {
        Self {
            varray,
            expr,
            spec,
            plan,
        }
    }

    /// The subset shape: collapsed dimensions are dropped.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        self.spec.shape()
    }

    /// The canonical per-dimension bounds.
    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        self.spec.bounds()
    }

    /// The number of tiles the subset touches.
    #[must_use]
    pub fn num_tiles(&self) -> usize {
        self.plan.len()
    }

    /// The canonical slice string of the originating expression.
    #[must_use]
    pub fn slice_string(&self) -> String {
        self.expr.to_string()
    }

    /// The values selected on each dimension.
    ///
    /// # Errors
    /// Returns a [`VArrayError`] if a time reference cannot be resolved.
    pub fn describe(&self) -> Result<Vec<DimensionSelection>, VArrayError> {
        Ok(self.spec.describe(&self.varray.dimensions()?))
    }

    /// Read the subset: parallel per-tile gathers into one aggregate buffer.
    ///
    /// Tiles that do not exist yet read as the fill value.
    ///
    /// # Errors
    /// Returns the first per-tile failure; see [`VArrayError::Tile`].
    pub fn read(&self) -> Result<TypedBuffer, VArrayError> {
        debug!(varray = %self.varray.id(), bounds = %self.expr, "reading virtual subset");
        let subset_shape = self.spec.bounds().shape().to_vec();
        let slots: Vec<TileSlot> = self.plan.iter().collect();
        let mut aggregate = TypedBuffer::filled(
            self.varray.schema().fill_value(),
            self.spec.num_elements() as usize,
        );
        map_variants!(&mut aggregate, data => self.gather(data, &subset_shape, &slots))?;
        info!(varray = %self.varray.id(), bounds = %self.expr, "virtual subset read");
        Ok(aggregate)
    }

    /// Write `data` over the subset: the buffer is split along the outer
    /// slices and scattered onto the tiles in parallel, each write under its
    /// tile's writer lock. Missing tiles are created on demand.
    ///
    /// # Errors
    /// Returns the first per-tile failure; see [`VArrayError::Tile`].
    /// Already-committed tile writes are not rolled back.
    pub fn update(&self, data: TypedBuffer) -> Result<(), VArrayError> {
        debug!(varray = %self.varray.id(), bounds = %self.expr, "updating virtual subset");
        if data.len() as u64 != self.spec.num_elements() {
            return Err(ArrayError::ShapeMismatch {
                expected: self.shape(),
                got: data.len(),
            }
            .into());
        }
        let data = data
            .convert_to(self.varray.schema().element_type())
            .map_err(ArrayError::from)?;
        let subset_shape = self.spec.bounds().shape().to_vec();
        let slots: Vec<TileSlot> = self.plan.iter().collect();
        let _guards = self.lock_tiles(&slots)?;

        let abort = AtomicBool::new(false);
        let failure = Mutex::new(None);
        self.varray.core().pool.scope(|scope| {
            for slot in &slots {
                let (abort, failure, data, subset_shape) = (&abort, &failure, &data, &subset_shape);
                scope.spawn(move |_| {
                    if abort.load(Ordering::Acquire) {
                        return;
                    }
                    let written = data
                        .extract_region(subset_shape, &slot.outer)
                        .map_err(ArrayError::from)
                        .and_then(|chunk| {
                            let tile = self.varray.ensure_tile(&slot.tile)?;
                            tile.write_region_unlocked(&slot.inner, &chunk)
                        });
                    if let Err(error) = written {
                        self.record_failure(abort, failure, slot, error);
                    }
                });
            }
        });
        Self::surface(failure)?;
        info!(varray = %self.varray.id(), bounds = %self.expr, "virtual subset updated");
        Ok(())
    }

    /// Reset the subset to the fill value. A tile covered completely is
    /// deleted outright; partially covered tiles get fill-valued writes.
    ///
    /// # Errors
    /// Returns the first per-tile failure; see [`VArrayError::Tile`].
    pub fn clear(&self) -> Result<(), VArrayError> {
        debug!(varray = %self.varray.id(), bounds = %self.expr, "clearing virtual subset");
        let arrays_shape = self.varray.arrays_shape();
        let slots: Vec<TileSlot> = self.plan.iter().collect();
        let _guards = self.lock_tiles(&slots)?;

        let abort = AtomicBool::new(false);
        let failure = Mutex::new(None);
        self.varray.core().pool.scope(|scope| {
            for slot in &slots {
                let (abort, failure, arrays_shape) = (&abort, &failure, &arrays_shape);
                scope.spawn(move |_| {
                    if abort.load(Ordering::Acquire) {
                        return;
                    }
                    let cleared = (|| {
                        let Some(tile) = self.varray.tile_array(&slot.tile)? else {
                            return Ok(());
                        };
                        if slot.inner == Bounds::whole(arrays_shape) {
                            tile.delete_unlocked()
                        } else {
                            tile.clear_region_unlocked(&slot.inner)
                        }
                    })();
                    if let Err(error) = cleared {
                        self.record_failure(abort, failure, slot, error);
                    }
                });
            }
        });
        Self::surface(failure)?;
        info!(varray = %self.varray.id(), bounds = %self.expr, "virtual subset cleared");
        Ok(())
    }

    /// Acquire every affected tile's writer lock, in the plan's
    /// dimension-major order so that overlapping writers never deadlock.
    fn lock_tiles(&self, slots: &[TileSlot]) -> Result<Vec<locks::WriteGuard>, VArrayError> {
        let settings = &self.varray.core().lock_settings;
        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            let path = self.varray.tile_lock_path(&slot.tile);
            guards.push(locks::acquire_write(&path, settings)?);
        }
        Ok(guards)
    }

    fn gather<T: Element>(
        &self,
        aggregate: &mut [T],
        subset_shape: &[u64],
        slots: &[TileSlot],
    ) -> Result<(), VArrayError> {
        if slots.is_empty() || aggregate.is_empty() {
            return Ok(());
        }
        let output = CellSlice::new(aggregate);
        let abort = AtomicBool::new(false);
        let failure = Mutex::new(None);
        self.varray.core().pool.scope(|scope| {
            for slot in slots {
                let (abort, failure, output) = (&abort, &failure, output);
                scope.spawn(move |_| {
                    if abort.load(Ordering::Acquire) {
                        return;
                    }
                    match self.read_tile::<T>(slot) {
                        Ok(tile_data) => {
                            // Outer slices are disjoint by construction, so
                            // unsynchronized writes into the aggregate are
                            // sound.
                            let out = unsafe { output.get() };
                            let mut cursor = 0_usize;
                            let spans = match slot.outer.contiguous_spans(subset_shape) {
                                Ok(spans) => spans,
                                Err(error) => {
                                    self.record_failure(
                                        abort,
                                        failure,
                                        slot,
                                        BufferError::from(error).into(),
                                    );
                                    return;
                                }
                            };
                            for (offset, len) in spans {
                                let offset = offset as usize;
                                let len = len as usize;
                                out[offset..offset + len]
                                    .copy_from_slice(&tile_data[cursor..cursor + len]);
                                cursor += len;
                            }
                        }
                        Err(error) => self.record_failure(abort, failure, slot, error),
                    }
                });
            }
        });
        Self::surface(failure)
    }

    /// Read one tile's inner region, synthesizing fill for absent tiles.
    fn read_tile<T: Element>(&self, slot: &TileSlot) -> Result<Vec<T>, ArrayError> {
        let mismatch = || BufferError::DtypeMismatch {
            expected: T::ELEMENT_TYPE,
            got: self.varray.schema().element_type(),
        };
        match self.varray.tile_array(&slot.tile)? {
            Some(tile) => {
                let _guard = tile.lock_read()?;
                let buffer = tile.read_region_unlocked(&slot.inner)?;
                Ok(buffer.as_slice::<T>().ok_or_else(mismatch)?.to_vec())
            }
            None => {
                let fill =
                    T::from_scalar(self.varray.schema().fill_value()).ok_or_else(mismatch)?;
                Ok(vec![fill; slot.inner.num_elements() as usize])
            }
        }
    }

    /// Record the first failure and cancel the remaining workers.
    fn record_failure(
        &self,
        abort: &AtomicBool,
        failure: &Mutex<Option<VArrayError>>,
        slot: &TileSlot,
        source: ArrayError,
    ) {
        abort.store(true, Ordering::Release);
        let error = VArrayError::Tile {
            tile: slot.tile.clone(),
            varray: self.varray.id(),
            source: Box::new(source),
        };
        let mut first = failure.lock();
        if first.is_none() {
            *first = Some(error);
        } else {
            warn!(%error, "further tile failure collapsed into the first");
        }
    }

    fn surface(failure: Mutex<Option<VArrayError>>) -> Result<(), VArrayError> {
        match failure.into_inner() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

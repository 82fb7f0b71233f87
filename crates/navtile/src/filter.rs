//! Filters that mark spans unwalkable before the heightfield is compacted.

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::AreaType,
};

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb_height` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb_height: u16) {
        for z in 0..self.depth {
            for x in 0..self.width {
                let mut previous: Option<(u16, bool, AreaType)> = None;
                let mut span_key_iter = self.span_key_at(x, z);

                // For each span in the column...
                while let Some(span_key) = span_key_iter {
                    let span = self.span_mut(span_key);
                    span_key_iter = span.next();
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some((previous_max, previous_was_walkable, previous_area)) = previous {
                        if !walkable
                            && previous_was_walkable
                            && (span.max() as i32 - previous_max as i32)
                                <= walkable_climb_height as i32
                        {
                            span.set_area(previous_area);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous = Some((span.max(), walkable, span.area()));
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// A span is a ledge if: `abs(current_span.max - neighbor_span.max) > walkable_climb`
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;
        let max_height = Self::MAX_HEIGHT as i32;
        let mut ledges = Vec::new();

        for z in 0..self.depth {
            for x in 0..self.width {
                for span_key in self.column(x, z) {
                    let span = self.span(span_key);
                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let bot = span.max() as i32;
                    let top = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(max_height);

                    // The difference between this walkable area and the lowest neighbor walkable area.
                    // This is the difference between the current span and all neighbor spans that have
                    // enough space for an agent to move between, but not accounting at all for surface slope.
                    let mut lowest_neighbor_floor_difference = max_height;

                    // Min and max floors of neighbors that are reachable from the current span.
                    let mut lowest_traversable_neighbor_floor = bot;
                    let mut highest_traversable_neighbor_floor = bot;

                    for dir in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;

                        // Skip neighbors which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }
                        let neighbor_x = neighbor_x as u16;
                        let neighbor_z = neighbor_z as u16;

                        // The most we can step down to the neighbor is the walkable climb distance.
                        let mut neighbor_bot = -walkable_climb - 1;
                        let mut neighbor_top = self
                            .span_at(neighbor_x, neighbor_z)
                            .map(|span| span.min() as i32)
                            .unwrap_or(max_height);

                        // A gap below the neighbor's lowest span that the agent fits into is a drop.
                        if top.min(neighbor_top) - bot.max(neighbor_bot) >= walkable_height {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        // For each span in the neighboring column...
                        for neighbor_key in self.column(neighbor_x, neighbor_z) {
                            let neighbor = self.span(neighbor_key);
                            neighbor_bot = neighbor.max() as i32;
                            neighbor_top = neighbor
                                .next()
                                .map(|next| self.span(next).min() as i32)
                                .unwrap_or(max_height);

                            // Only consider neighboring areas that have enough overlap to be potentially traversable.
                            if top.min(neighbor_top) - bot.max(neighbor_bot) < walkable_height {
                                // No space to traverse between them.
                                continue;
                            }

                            let neighbor_floor_difference = neighbor_bot - bot;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                            // Find min/max accessible neighbor height.
                            // Only consider neighbors that are at most walkable_climb away.
                            if neighbor_floor_difference.abs() <= walkable_climb {
                                // There is space to move to the neighbor cell and the slope isn't too much.
                                lowest_traversable_neighbor_floor =
                                    lowest_traversable_neighbor_floor.min(neighbor_bot);
                                highest_traversable_neighbor_floor =
                                    highest_traversable_neighbor_floor.max(neighbor_bot);
                            } else if neighbor_floor_difference < -walkable_climb {
                                // We already know this will be considered a ledge span so we can early-out
                                break;
                            }
                        }
                    }

                    // The current span is close to a ledge if the magnitude of the drop to any neighbour span
                    // is greater than the walkable_climb distance.
                    // That is, there is a gap that is large enough to let an agent move between them,
                    // but the drop (surface slope) is too large to allow it.
                    if lowest_neighbor_floor_difference < -walkable_climb {
                        ledges.push(span_key);
                    }
                    // If the difference between all neighbor floors is too large,
                    // this is a steep slope, so mark the span as an unwalkable ledge.
                    else if highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                        > walkable_climb
                    {
                        ledges.push(span_key);
                    }
                }
            }
        }

        for span_key in ledges {
            self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        let mut too_low = Vec::new();
        for z in 0..self.depth {
            for x in 0..self.width {
                for span_key in self.column(x, z) {
                    let span = self.span(span_key);
                    let bot = span.max() as i32;
                    let top = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(Self::MAX_HEIGHT as i32);
                    if top - bot < walkable_height as i32 {
                        too_low.push(span_key);
                    }
                }
            }
        }
        for span_key in too_low {
            self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
        }
    }
}

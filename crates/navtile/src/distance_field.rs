//! Distance to the nearest region border for every span, used to seed the watershed.

use crate::{CompactHeightfield, math::dir_offset_x, math::dir_offset_z};

impl CompactHeightfield {
    /// Prepares the compact heightfield for region building by computing the distance of every span
    /// to the closest boundary and smoothing the result.
    ///
    /// A span is on the boundary when one of its four neighbors is missing or has a different area.
    /// The result is stored in [`CompactHeightfield::dist`] and [`CompactHeightfield::max_distance`].
    pub fn build_distance_field(&mut self) {
        let mut src = vec![u16::MAX; self.spans.len()];
        // Mark boundary cells.
        for (x, z, i) in self.iter_spans() {
            let area = self.areas[i];
            let mut neighbor_count = 0;
            for dir in 0..4 {
                let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                    continue;
                };
                if self.areas[a_i] == area {
                    neighbor_count += 1;
                }
            }
            if neighbor_count != 4 {
                src[i] = 0;
            }
        }
        self.chamfer(&mut src);
        self.max_distance = src.iter().copied().max().unwrap_or(0);

        self.dist = self.box_blur(1, &src);
    }

    /// Two-pass chamfer distance transform. Orthogonal steps cost 2, diagonal steps cost 3.
    /// Spans with a distance of 0 act as seeds.
    pub(crate) fn chamfer(&self, dist: &mut [u16]) {
        let relax = |dist: &mut [u16], i: usize, from: usize, cost: u16| {
            let nd = dist[from].saturating_add(cost);
            if nd < dist[i] {
                dist[i] = nd;
            }
        };

        // Pass 1
        for z in 0..self.depth {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    // (-1,0)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 0) {
                        relax(dist, i, a_i, 2);
                        // (-1,-1)
                        let a_x = (x as i32 + dir_offset_x(0) as i32) as u16;
                        if let Some(b_i) = self.neighbor_index(a_x, z, a_i, 3) {
                            relax(dist, i, b_i, 3);
                        }
                    }
                    // (0,-1)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 3) {
                        relax(dist, i, a_i, 2);
                        // (1,-1)
                        let a_z = (z as i32 + dir_offset_z(3) as i32) as u16;
                        if let Some(b_i) = self.neighbor_index(x, a_z, a_i, 2) {
                            relax(dist, i, b_i, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.depth).rev() {
            for x in (0..self.width).rev() {
                for i in self.cell_at(x, z).index_range() {
                    // (1,0)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 2) {
                        relax(dist, i, a_i, 2);
                        // (1,1)
                        let a_x = (x as i32 + dir_offset_x(2) as i32) as u16;
                        if let Some(b_i) = self.neighbor_index(a_x, z, a_i, 1) {
                            relax(dist, i, b_i, 3);
                        }
                    }
                    // (0,1)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 1) {
                        relax(dist, i, a_i, 2);
                        // (-1,1)
                        let a_z = (z as i32 + dir_offset_z(1) as i32) as u16;
                        if let Some(b_i) = self.neighbor_index(x, a_z, a_i, 0) {
                            relax(dist, i, b_i, 3);
                        }
                    }
                }
            }
        }
    }

    fn box_blur(&self, threshold: u16, src: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut dst = vec![0; src.len()];
        for (x, z, i) in self.iter_spans() {
            let cd = src[i];
            if cd <= threshold {
                dst[i] = cd;
                continue;
            }

            let mut d = cd as u32;
            for dir in 0..4 {
                let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                    d += cd as u32 * 2;
                    continue;
                };
                d += src[a_i] as u32;
                let a_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
                let a_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
                let dir2 = (dir + 1) & 0x3;
                match self.neighbor_index(a_x, a_z, a_i, dir2) {
                    Some(b_i) => d += src[b_i] as u32,
                    None => d += cd as u32,
                }
            }
            dst[i] = ((d + 5) / 9) as u16;
        }
        dst
    }
}

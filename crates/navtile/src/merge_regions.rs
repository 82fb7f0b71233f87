//! Merges and filters the raw regions left behind by watershed partitioning.

use std::collections::BTreeSet;

use crate::{CompactHeightfield, region::RegionId, span::AreaType};

/// Controls which regions must contain a relevant surface point to survive region filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum RelevantSurfaceMode {
    /// Relevant surfaces are ignored.
    #[default]
    DoNotRequire,
    /// Groups of regions that do not touch the border of the field must contain a relevant surface.
    /// Groups touching the border are kept, since a neighboring tile might hold their surface.
    OnlyForCompletelyInsideTile,
    /// Every group of regions must contain a relevant surface.
    RequireForAll,
}

#[derive(Debug, Default)]
struct RegionInfo {
    span_count: u32,
    area: AreaType,
    removed: bool,
    touches_border: bool,
    relevant: bool,
    neighbors: BTreeSet<u16>,
    floors: BTreeSet<u16>,
}

impl CompactHeightfield {
    /// Removes and merges small regions. Returns the highest region id after compaction.
    pub(crate) fn merge_and_filter_regions(
        &self,
        min_region_area: u16,
        merge_region_area: u16,
        region_count: u16,
        mode: RelevantSurfaceMode,
        relevant_spans: &[usize],
        src_reg: &mut [RegionId],
    ) -> u16 {
        let mut regions: Vec<RegionInfo> = (0..region_count).map(|_| RegionInfo::default()).collect();
        let interior = |region: RegionId| region.is_interior().then_some(region.bits());

        for (x, z, i) in self.iter_spans() {
            let Some(r) = interior(src_reg[i]) else {
                continue;
            };
            let on_edge = x == 0 || z == 0 || x + 1 == self.width || z + 1 == self.depth;
            let info = &mut regions[r as usize];
            info.span_count += 1;
            info.area = self.areas[i];
            info.touches_border |= on_edge;

            for dir in 0..4 {
                let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                    continue;
                };
                let neighbor = src_reg[a_i];
                if neighbor.is_border() {
                    regions[r as usize].touches_border = true;
                } else if let Some(n) = interior(neighbor).filter(|&n| n != r) {
                    regions[r as usize].neighbors.insert(n);
                }
            }

            // Regions stacked in the same column must never merge.
            for j in self.cell_at(x, z).index_range() {
                if let Some(other) = interior(src_reg[j]).filter(|&other| other != r) {
                    regions[r as usize].floors.insert(other);
                }
            }
        }
        for &i in relevant_spans {
            if let Some(r) = interior(src_reg[i]) {
                regions[r as usize].relevant = true;
            }
        }

        filter_components(&mut regions, min_region_area, mode);
        let mut parent: Vec<u16> = (0..region_count).collect();
        merge_small_regions(&mut regions, &mut parent, merge_region_area);

        // Compact the surviving ids.
        let mut remap = vec![0_u16; region_count as usize];
        let mut next_id = 0;
        for r in 0..region_count {
            let info = &regions[r as usize];
            if parent[r as usize] == r && !info.removed && info.span_count > 0 {
                next_id += 1;
                remap[r as usize] = next_id;
            }
        }
        for region in src_reg.iter_mut() {
            let Some(r) = interior(*region) else {
                continue;
            };
            let root = find(&mut parent, r);
            *region = if regions[root as usize].removed {
                RegionId::NONE
            } else {
                RegionId::from(remap[root as usize])
            };
        }
        next_id
    }
}

/// Removes connected groups of regions that are too small or lack a relevant surface.
fn filter_components(regions: &mut [RegionInfo], min_region_area: u16, mode: RelevantSurfaceMode) {
    let mut visited = vec![false; regions.len()];
    let mut stack = Vec::new();
    let mut component = Vec::new();
    for start in 0..regions.len() {
        if visited[start] || regions[start].span_count == 0 {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        component.clear();

        let mut span_count = 0;
        let mut touches_border = false;
        let mut relevant = false;
        while let Some(r) = stack.pop() {
            component.push(r);
            let info = &regions[r];
            span_count += info.span_count;
            touches_border |= info.touches_border;
            relevant |= info.relevant;
            for &n in &info.neighbors {
                if !visited[n as usize] {
                    visited[n as usize] = true;
                    stack.push(n as usize);
                }
            }
        }

        let remove = match mode {
            _ if span_count < min_region_area as u32 && !touches_border => true,
            RelevantSurfaceMode::DoNotRequire => false,
            RelevantSurfaceMode::OnlyForCompletelyInsideTile => !relevant && !touches_border,
            RelevantSurfaceMode::RequireForAll => !relevant,
        };
        if remove {
            tracing::trace!(span_count, regions = component.len(), "Removing small region group");
            for &r in &component {
                regions[r].removed = true;
            }
        }
    }
}

/// Merges regions below `merge_region_area` into their smallest compatible neighbor until nothing changes.
fn merge_small_regions(regions: &mut [RegionInfo], parent: &mut [u16], merge_region_area: u16) {
    loop {
        let mut merged_any = false;
        for r in 0..regions.len() as u16 {
            let info = &regions[r as usize];
            if parent[r as usize] != r
                || info.removed
                || info.span_count == 0
                || info.span_count >= merge_region_area as u32
            {
                continue;
            }

            let neighbors: Vec<u16> = info.neighbors.iter().copied().collect();
            let floors: BTreeSet<u16> = info.floors.iter().map(|&f| find(parent, f)).collect();
            let area = info.area;
            let mut target: Option<(u32, u16)> = None;
            for n in neighbors {
                let n = find(parent, n);
                let candidate = &regions[n as usize];
                if n == r || candidate.removed || candidate.area != area || floors.contains(&n) {
                    continue;
                }
                let key = (candidate.span_count, n);
                if target.is_none_or(|best| key < best) {
                    target = Some(key);
                }
            }
            let Some((_, target)) = target else {
                continue;
            };

            parent[r as usize] = target;
            let absorbed = std::mem::take(&mut regions[r as usize]);
            let into = &mut regions[target as usize];
            into.span_count += absorbed.span_count;
            into.touches_border |= absorbed.touches_border;
            into.relevant |= absorbed.relevant;
            into.neighbors.extend(absorbed.neighbors);
            into.floors.extend(absorbed.floors);
            into.neighbors.remove(&r);
            into.neighbors.remove(&target);
            merged_any = true;
        }
        if !merged_any {
            break;
        }
    }
}

fn find(parent: &mut [u16], mut r: u16) -> u16 {
    while parent[r as usize] != r {
        let grandparent = parent[parent[r as usize] as usize];
        parent[r as usize] = grandparent;
        r = grandparent;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(span_count: u32, neighbors: &[u16]) -> RegionInfo {
        RegionInfo {
            span_count,
            area: AreaType::DEFAULT_WALKABLE,
            neighbors: neighbors.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn small_regions_merge_into_smallest_neighbor() {
        let mut regions = vec![
            RegionInfo::default(),
            info(2, &[2, 3]),
            info(10, &[1]),
            info(5, &[1]),
        ];
        let mut parent = vec![0, 1, 2, 3];
        merge_small_regions(&mut regions, &mut parent, 4);
        assert_eq!(find(&mut parent, 1), 3);
        assert_eq!(regions[3].span_count, 7);
        assert_eq!(find(&mut parent, 2), 2);
    }

    #[test]
    fn stacked_regions_do_not_merge() {
        let mut regions = vec![RegionInfo::default(), info(2, &[2]), info(3, &[1])];
        regions[1].floors.insert(2);
        regions[2].floors.insert(1);
        let mut parent = vec![0, 1, 2];
        merge_small_regions(&mut regions, &mut parent, 100);
        assert_eq!(find(&mut parent, 1), 1);
        assert_eq!(find(&mut parent, 2), 2);
    }

    #[test]
    fn incompatible_areas_do_not_merge() {
        let mut regions = vec![RegionInfo::default(), info(2, &[2]), info(3, &[1])];
        regions[2].area = AreaType(7);
        let mut parent = vec![0, 1, 2];
        merge_small_regions(&mut regions, &mut parent, 100);
        assert_eq!(find(&mut parent, 1), 1);
    }

    #[test]
    fn border_regions_survive_filtering() {
        let mut regions = vec![RegionInfo::default(), info(2, &[]), info(2, &[])];
        regions[2].touches_border = true;
        filter_components(&mut regions, 5, RelevantSurfaceMode::DoNotRequire);
        assert!(regions[1].removed);
        assert!(!regions[2].removed);
    }

    #[test]
    fn relevant_surfaces_filter_by_mode() {
        let make = || {
            let mut regions = vec![
                RegionInfo::default(),
                info(20, &[]),
                info(20, &[]),
                info(20, &[]),
            ];
            regions[2].touches_border = true;
            regions[3].relevant = true;
            regions
        };
        let mut regions = make();
        filter_components(&mut regions, 5, RelevantSurfaceMode::OnlyForCompletelyInsideTile);
        assert_eq!(
            regions.iter().map(|r| r.removed).collect::<Vec<_>>(),
            vec![false, true, false, false]
        );

        let mut regions = make();
        filter_components(&mut regions, 5, RelevantSurfaceMode::RequireForAll);
        assert_eq!(
            regions.iter().map(|r| r.removed).collect::<Vec<_>>(),
            vec![false, true, true, false]
        );
    }
}

//! Weighted scene scheduling.
//!
//! Every matrix row pairs a scene with per-node weights. Each accumulation
//! round adds a tenth of the weight to the node's lot; a lot reaching 1.0
//! triggers the scene on that node and resets to zero. Larger weights thus
//! fire proportionally more often while small ones still get their turn.

use heapless::Vec;

/// Weight and accumulator of one node in a row.
#[derive(Debug, Clone, Copy)]
pub struct Assignment {
    pub node: u8,
    pub weight: f32,
    lots: f32,
}

/// One scene with its node assignments.
#[derive(Debug, Clone)]
pub struct MatrixRow<const N: usize> {
    pub scene: u16,
    assignments: Vec<Assignment, N>,
}

/// The scene scheduling matrix: `R` scenes by up to `N` nodes each.
#[derive(Debug, Clone, Default)]
pub struct SceneMatrix<const R: usize, const N: usize> {
    rows: Vec<MatrixRow<N>, R>,
}

impl<const R: usize, const N: usize> SceneMatrix<R, N> {
    pub const fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Add a row for `scene`. Fails when the matrix is full.
    pub fn add_scene(&mut self, scene: u16) -> bool {
        self.rows
            .push(MatrixRow {
                scene,
                assignments: Vec::new(),
            })
            .is_ok()
    }

    /// Set the weight of `node` in the `scene` row, creating the
    /// assignment as needed.
    pub fn set_weight(&mut self, scene: u16, node: u8, weight: f32) -> bool {
        let Some(row) = self.rows.iter_mut().find(|row| row.scene == scene) else {
            return false;
        };

        if let Some(assignment) = row
            .assignments
            .iter_mut()
            .find(|assignment| assignment.node == node)
        {
            assignment.weight = weight;
            return true;
        }

        row.assignments
            .push(Assignment {
                node,
                weight,
                lots: 0.0,
            })
            .is_ok()
    }

    /// Forget all accumulated lots.
    pub fn reset_lots(&mut self) {
        for row in &mut self.rows {
            for assignment in &mut row.assignments {
                assignment.lots = 0.0;
            }
        }
    }

    /// One accumulation round; `trigger` fires with `(node, scene)` for
    /// every lot that filled up.
    pub fn accumulate(&mut self, mut trigger: impl FnMut(u8, u16)) {
        for row in &mut self.rows {
            for assignment in &mut row.assignments {
                assignment.lots += assignment.weight / 10.0;

                if assignment.lots >= 1.0 {
                    assignment.lots = 0.0;
                    trigger(assignment.node, row.scene);
                }
            }
        }
    }
}

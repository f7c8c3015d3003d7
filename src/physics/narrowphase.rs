//! Narrowphase collision detection: GJK, EPA, and specialized tests.
//!
//! Every path returns a [`CollisionResult`] whose normal points from shape B
//! towards shape A. Separated pairs report a positive distance and the closest
//! points; penetrating pairs report a negative distance and the deepest points.

use glam::{DAffine3, DVec3};

use crate::ecs::components::physics::ColliderShape;
use crate::ecs::components::transform::GlobalTransform;

use super::collider::PointQuery;
use super::contact::CollisionResult;

const GJK_MAX_ITERATIONS: usize = 64;
const GJK_RELATIVE_TOLERANCE: f64 = 1e-10;
const GJK_TOUCH_TOLERANCE_SQ: f64 = 1e-24;
const EPA_MAX_ITERATIONS: usize = 64;
const EPA_TOLERANCE: f64 = 1e-9;
const DEGENERATE_EPSILON: f64 = 1e-12;

/// A vertex of the Minkowski difference together with the shape points that produced it.
#[derive(Debug, Clone, Copy)]
pub struct SupportPoint {
    pub w: DVec3,
    pub a: DVec3,
    pub b: DVec3,
}

/// A simplex used by the GJK algorithm (up to 4 vertices in 3D), with the
/// barycentric weights of the current closest point.
#[derive(Debug, Clone)]
pub struct Simplex {
    pub points: Vec<SupportPoint>,
    pub weights: Vec<f64>,
}

impl Simplex {
    fn single(point: SupportPoint) -> Self {
        let mut points = Vec::with_capacity(4);
        points.push(point);
        Self {
            points,
            weights: vec![1.0],
        }
    }

    fn closest(&self) -> DVec3 {
        self.points
            .iter()
            .zip(&self.weights)
            .map(|(p, w)| p.w * *w)
            .sum()
    }

    /// Witness points on A and B for the current closest point.
    fn witnesses(&self) -> (DVec3, DVec3) {
        let mut a = DVec3::ZERO;
        let mut b = DVec3::ZERO;
        for (p, w) in self.points.iter().zip(&self.weights) {
            a += p.a * *w;
            b += p.b * *w;
        }
        (a, b)
    }

    fn contains(&self, w: DVec3) -> bool {
        self.points
            .iter()
            .any(|p| p.w.distance_squared(w) < DEGENERATE_EPSILON * DEGENERATE_EPSILON)
    }
}

/// Minkowski difference support function.
fn minkowski_support(
    shape_a: &ColliderShape,
    transform_a: &GlobalTransform,
    shape_b: &ColliderShape,
    transform_b: &GlobalTransform,
    direction: DVec3,
) -> SupportPoint {
    let a = shape_a.support(direction, transform_a);
    let b = shape_b.support(-direction, transform_b);
    SupportPoint { w: a - b, a, b }
}

/// Outcome of the GJK distance query.
#[derive(Debug, Clone)]
pub enum GjkOutcome {
    /// Shapes are disjoint. The simplex carries the closest-point weights.
    Separated(Simplex),
    /// Origin is enclosed by (or touches) the Minkowski difference.
    Intersecting(Simplex),
}

/// GJK closest-point query between two bounded convex shapes.
pub fn gjk(
    shape_a: &ColliderShape,
    transform_a: &GlobalTransform,
    shape_b: &ColliderShape,
    transform_b: &GlobalTransform,
) -> GjkOutcome {
    let mut direction = transform_a.translation() - transform_b.translation();
    if direction.length_squared() < DEGENERATE_EPSILON {
        direction = DVec3::X; // Initial arbitrary direction
    }

    let first = minkowski_support(shape_a, transform_a, shape_b, transform_b, -direction);
    let mut simplex = Simplex::single(first);
    let mut v = first.w;

    for _ in 0..GJK_MAX_ITERATIONS {
        let v_len_sq = v.length_squared();
        if v_len_sq <= GJK_TOUCH_TOLERANCE_SQ {
            return GjkOutcome::Intersecting(simplex);
        }

        let w = minkowski_support(shape_a, transform_a, shape_b, transform_b, -v);

        // No further progress towards the origin is possible.
        if v_len_sq - v.dot(w.w) <= GJK_RELATIVE_TOLERANCE * v_len_sq || simplex.contains(w.w) {
            return GjkOutcome::Separated(simplex);
        }

        simplex.points.push(w);
        match reduce_simplex(&simplex.points) {
            Some(reduced) => {
                let next = reduced.closest();
                simplex = reduced;
                if next.length_squared() >= v_len_sq {
                    return GjkOutcome::Separated(simplex);
                }
                v = next;
            }
            None => return GjkOutcome::Intersecting(simplex),
        }
    }

    GjkOutcome::Separated(simplex)
}

/// Reduce a simplex to the smallest sub-simplex supporting its closest point to the origin.
///
/// Returns `None` when the origin lies inside a full tetrahedron.
fn reduce_simplex(points: &[SupportPoint]) -> Option<Simplex> {
    match points.len() {
        1 => Some(Simplex::single(points[0])),
        2 => Some(reduce_segment(points[0], points[1])),
        3 => Some(reduce_triangle(points[0], points[1], points[2])),
        4 => reduce_tetrahedron(points),
        _ => None,
    }
}

fn reduce_segment(p0: SupportPoint, p1: SupportPoint) -> Simplex {
    let d = p1.w - p0.w;
    let len_sq = d.length_squared();
    if len_sq < DEGENERATE_EPSILON {
        return Simplex::single(p1);
    }
    let t = (-p0.w.dot(d) / len_sq).clamp(0.0, 1.0);
    if t <= 0.0 {
        Simplex::single(p0)
    } else if t >= 1.0 {
        Simplex::single(p1)
    } else {
        Simplex {
            points: vec![p0, p1],
            weights: vec![1.0 - t, t],
        }
    }
}

fn reduce_triangle(p0: SupportPoint, p1: SupportPoint, p2: SupportPoint) -> Simplex {
    let (_, bary) = closest_point_on_triangle(p0.w, p1.w, p2.w);
    let mut points = Vec::with_capacity(3);
    let mut weights = Vec::with_capacity(3);
    for (p, w) in [p0, p1, p2].into_iter().zip(bary) {
        if w > 0.0 {
            points.push(p);
            weights.push(w);
        }
    }
    if points.is_empty() {
        return Simplex::single(p2);
    }
    Simplex { points, weights }
}

fn reduce_tetrahedron(points: &[SupportPoint]) -> Option<Simplex> {
    let [a, b, c, d] = [points[0], points[1], points[2], points[3]];
    let faces = [(a, b, c, d), (a, c, d, b), (a, d, b, c), (b, d, c, a)];

    let volume = (b.w - a.w).cross(c.w - a.w).dot(d.w - a.w);
    let degenerate = volume.abs() < DEGENERATE_EPSILON;

    let mut best: Option<Simplex> = None;
    let mut best_dist = f64::MAX;
    for (p, q, r, opposite) in faces {
        let normal = (q.w - p.w).cross(r.w - p.w);
        let origin_side = (-p.w).dot(normal);
        let opposite_side = (opposite.w - p.w).dot(normal);
        if !degenerate && origin_side * opposite_side >= 0.0 {
            continue;
        }
        let candidate = reduce_triangle(p, q, r);
        let dist = candidate.closest().length_squared();
        if dist < best_dist {
            best_dist = dist;
            best = Some(candidate);
        }
    }

    // Origin is inside the tetrahedron when no face separates it.
    best
}

/// Find the closest point on a triangle to the origin, with its barycentric weights.
fn closest_point_on_triangle(a: DVec3, b: DVec3, c: DVec3) -> (DVec3, [f64; 3]) {
    let ab = b - a;
    let ac = c - a;
    let ao = -a;

    let d1 = ab.dot(ao);
    let d2 = ac.dot(ao);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, [1.0, 0.0, 0.0]);
    }

    let bo = -b;
    let d3 = ab.dot(bo);
    let d4 = ac.dot(bo);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, [1.0 - v, v, 0.0]);
    }

    let co = -c;
    let d5 = ab.dot(co);
    let d6 = ac.dot(co);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, [0.0, 1.0 - w, w]);
    }

    let sum = va + vb + vc;
    if sum.abs() < f64::MIN_POSITIVE {
        return (a, [1.0, 0.0, 0.0]);
    }
    let denom = 1.0 / sum;
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, [1.0 - v - w, v, w])
}

/// Grow a touching GJK simplex into a tetrahedron with non-zero volume.
fn complete_tetrahedron(
    mut points: Vec<SupportPoint>,
    shape_a: &ColliderShape,
    transform_a: &GlobalTransform,
    shape_b: &ColliderShape,
    transform_b: &GlobalTransform,
) -> Option<Vec<SupportPoint>> {
    const AXES: [DVec3; 3] = [DVec3::X, DVec3::Y, DVec3::Z];
    let support = |dir: DVec3| minkowski_support(shape_a, transform_a, shape_b, transform_b, dir);

    if points.len() == 1 {
        let origin = points[0].w;
        let extra = AXES
            .iter()
            .flat_map(|axis| [*axis, -*axis])
            .map(support)
            .find(|p| p.w.distance_squared(origin) > DEGENERATE_EPSILON)?;
        points.push(extra);
    }

    if points.len() == 2 {
        let line = points[1].w - points[0].w;
        let origin = points[0].w;
        let extra = AXES
            .iter()
            .map(|axis| line.cross(*axis))
            .filter(|dir| dir.length_squared() > DEGENERATE_EPSILON)
            .flat_map(|dir| [dir, -dir])
            .map(support)
            .find(|p| (p.w - origin).cross(line).length_squared() > DEGENERATE_EPSILON)?;
        points.push(extra);
    }

    if points.len() == 3 {
        let origin = points[0].w;
        let normal = (points[1].w - origin).cross(points[2].w - origin);
        if normal.length_squared() < DEGENERATE_EPSILON {
            return None;
        }
        let extra = [normal, -normal]
            .into_iter()
            .map(support)
            .find(|p| (p.w - origin).dot(normal).abs() > DEGENERATE_EPSILON)?;
        points.push(extra);
    }

    let [a, b, c, d] = [points[0].w, points[1].w, points[2].w, points[3].w];
    if (b - a).cross(c - a).dot(d - a).abs() < DEGENERATE_EPSILON {
        return None;
    }
    Some(points)
}

#[derive(Debug, Clone, Copy)]
struct EpaFace {
    indices: [usize; 3],
    normal: DVec3,
    distance: f64,
}

/// Build a face oriented away from `interior`. Returns `None` for slivers.
fn make_face(polytope: &[SupportPoint], indices: [usize; 3], interior: DVec3) -> Option<EpaFace> {
    let a = polytope[indices[0]].w;
    let b = polytope[indices[1]].w;
    let c = polytope[indices[2]].w;
    let normal = (b - a).cross(c - a);
    let len = normal.length();
    if len < DEGENERATE_EPSILON {
        return None;
    }
    let mut normal = normal / len;
    let mut indices = indices;
    if normal.dot(a - interior) < 0.0 {
        normal = -normal;
        indices.swap(1, 2);
    }
    Some(EpaFace {
        indices,
        normal,
        distance: normal.dot(a),
    })
}

/// EPA (Expanding Polytope Algorithm) to compute penetration depth and witness points.
pub fn epa_penetration(
    simplex: &Simplex,
    shape_a: &ColliderShape,
    transform_a: &GlobalTransform,
    shape_b: &ColliderShape,
    transform_b: &GlobalTransform,
) -> Option<CollisionResult> {
    let polytope = complete_tetrahedron(
        simplex.points.clone(),
        shape_a,
        transform_a,
        shape_b,
        transform_b,
    )?;
    let mut polytope = polytope;
    let interior = polytope.iter().map(|p| p.w).sum::<DVec3>() / 4.0;

    let mut faces: Vec<EpaFace> = [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]]
        .into_iter()
        .filter_map(|indices| make_face(&polytope, indices, interior))
        .collect();

    let mut best = None;
    for _ in 0..EPA_MAX_ITERATIONS {
        // Find the face closest to the origin
        let closest = faces
            .iter()
            .copied()
            .min_by(|x, y| x.distance.total_cmp(&y.distance))?;
        best = Some(closest);

        // Get a new support point along the closest face's normal
        let new_point = minkowski_support(shape_a, transform_a, shape_b, transform_b, closest.normal);
        if new_point.w.dot(closest.normal) - closest.distance < EPA_TOLERANCE {
            break;
        }

        // Expand the polytope
        let new_idx = polytope.len();
        polytope.push(new_point);

        // Remove faces that can see the new point
        let mut edges: Vec<[usize; 2]> = Vec::new();
        let mut i = 0;
        while i < faces.len() {
            let face = faces[i];
            let a = polytope[face.indices[0]].w;
            if face.normal.dot(new_point.w - a) > DEGENERATE_EPSILON {
                add_edge(&mut edges, face.indices[0], face.indices[1]);
                add_edge(&mut edges, face.indices[1], face.indices[2]);
                add_edge(&mut edges, face.indices[2], face.indices[0]);
                faces.swap_remove(i);
            } else {
                i += 1;
            }
        }

        if edges.is_empty() {
            break;
        }

        // Create new faces from the edges to the new point
        for edge in &edges {
            if let Some(face) = make_face(&polytope, [edge[0], edge[1], new_idx], interior) {
                faces.push(face);
            }
        }

        if faces.is_empty() {
            break;
        }
    }

    let face = best?;
    let [i0, i1, i2] = face.indices;
    let (_, bary) = closest_point_on_triangle(polytope[i0].w, polytope[i1].w, polytope[i2].w);
    let point_on_a = polytope[i0].a * bary[0] + polytope[i1].a * bary[1] + polytope[i2].a * bary[2];
    let point_on_b = polytope[i0].b * bary[0] + polytope[i1].b * bary[1] + polytope[i2].b * bary[2];

    Some(CollisionResult {
        colliding: true,
        signed_distance: -face.distance.max(0.0),
        point_on_a,
        point_on_b,
        normal: -face.normal,
    })
}

/// Add an edge to the edge list, removing duplicates (shared edges).
fn add_edge(edges: &mut Vec<[usize; 2]>, a: usize, b: usize) {
    // Check if the reverse edge already exists
    if let Some(pos) = edges.iter().position(|e| e[0] == b && e[1] == a) {
        edges.swap_remove(pos);
    } else {
        edges.push([a, b]);
    }
}

/// General GJK + EPA path for two bounded convex shapes.
pub fn gjk_epa(
    shape_a: &ColliderShape,
    transform_a: &GlobalTransform,
    shape_b: &ColliderShape,
    transform_b: &GlobalTransform,
) -> CollisionResult {
    match gjk(shape_a, transform_a, shape_b, transform_b) {
        GjkOutcome::Separated(simplex) => {
            let (point_on_a, point_on_b) = simplex.witnesses();
            let offset = point_on_a - point_on_b;
            let distance = offset.length();
            CollisionResult {
                colliding: false,
                signed_distance: distance,
                point_on_a,
                point_on_b,
                normal: offset.try_normalize().unwrap_or(DVec3::Z),
            }
        }
        GjkOutcome::Intersecting(simplex) => {
            epa_penetration(&simplex, shape_a, transform_a, shape_b, transform_b).unwrap_or_else(
                || {
                    // Touching or flat pair: zero depth at the GJK witness points.
                    let (point_on_a, point_on_b) = simplex.witnesses();
                    let normal = (transform_a.translation() - transform_b.translation())
                        .try_normalize()
                        .unwrap_or(DVec3::Z);
                    CollisionResult {
                        colliding: true,
                        signed_distance: 0.0,
                        point_on_a,
                        point_on_b,
                        normal,
                    }
                },
            )
        }
    }
}

/// Specialized sphere-sphere test.
pub fn sphere_sphere(center_a: DVec3, radius_a: f64, center_b: DVec3, radius_b: f64) -> CollisionResult {
    let diff = center_a - center_b;
    let dist = diff.length();
    let normal = if dist > 1e-12 { diff / dist } else { DVec3::Z };

    let signed_distance = dist - radius_a - radius_b;
    CollisionResult {
        colliding: signed_distance < 0.0,
        signed_distance,
        point_on_a: center_a - normal * radius_a,
        point_on_b: center_b + normal * radius_b,
        normal,
    }
}

/// Specialized box-sphere test with the box as shape A.
pub fn box_sphere(half_extents: DVec3, box_transform: DAffine3, center: DVec3, radius: f64) -> CollisionResult {
    let local_center = box_transform.inverse().transform_point3(center);
    let clamped = local_center.clamp(-half_extents, half_extents);
    let inside = clamped == local_center;

    if inside {
        // Sphere centre inside the box: push out through the nearest face.
        let mut min_depth = f64::MAX;
        let mut axis = 2;
        for i in 0..3 {
            let depth = half_extents[i] - local_center[i].abs();
            if depth < min_depth {
                min_depth = depth;
                axis = i;
            }
        }
        let sign = if local_center[axis] >= 0.0 { 1.0 } else { -1.0 };
        let mut local_normal = DVec3::ZERO;
        local_normal[axis] = sign;
        let mut face_point = local_center;
        face_point[axis] = sign * half_extents[axis];

        let outward = box_transform.transform_vector3(local_normal);
        CollisionResult {
            colliding: true,
            signed_distance: -(min_depth + radius),
            point_on_a: box_transform.transform_point3(face_point),
            point_on_b: center - outward * radius,
            normal: -outward,
        }
    } else {
        let closest = box_transform.transform_point3(clamped);
        let diff = center - closest;
        let dist = diff.length();
        let outward = if dist > 1e-12 { diff / dist } else { DVec3::Z };
        let signed_distance = dist - radius;
        CollisionResult {
            colliding: signed_distance < 0.0,
            signed_distance,
            point_on_a: closest,
            point_on_b: center - outward * radius,
            normal: -outward,
        }
    }
}

/// SAT (Separating Axis Theorem) test for box-box collision.
///
/// Returns `None` when a separating axis exists.
pub fn sat_box_box(
    half_a: DVec3,
    transform_a: DAffine3,
    half_b: DVec3,
    transform_b: DAffine3,
) -> Option<CollisionResult> {
    let center_a = transform_a.translation;
    let center_b = transform_b.translation;

    // Extract axes (rotation columns)
    let axes_a = [
        transform_a.matrix3.x_axis,
        transform_a.matrix3.y_axis,
        transform_a.matrix3.z_axis,
    ];
    let axes_b = [
        transform_b.matrix3.x_axis,
        transform_b.matrix3.y_axis,
        transform_b.matrix3.z_axis,
    ];

    let half_a_arr = half_a.to_array();
    let half_b_arr = half_b.to_array();

    let t = center_b - center_a;

    let mut min_overlap = f64::MAX;
    let mut best_axis = DVec3::ZERO;

    // Test 15 axes: 3 from A, 3 from B, 9 cross products
    let face_axes = axes_a.iter().chain(axes_b.iter()).copied();
    let edge_axes = axes_a.iter().flat_map(|a| axes_b.iter().map(move |b| a.cross(*b)));

    for axis in face_axes.chain(edge_axes) {
        let len = axis.length();
        if len < 1e-9 {
            continue; // Parallel edges
        }
        let axis = axis / len;
        let overlap = sat_test_axis(axis, &axes_a, &half_a_arr, &axes_b, &half_b_arr, t)?;
        if overlap < min_overlap {
            min_overlap = overlap;
            best_axis = axis;
        }
    }

    // Orient the axis from A to B
    if best_axis.dot(t) < 0.0 {
        best_axis = -best_axis;
    }

    let extent_a: f64 = (0..3).map(|i| half_a_arr[i] * axes_a[i].dot(best_axis).abs()).sum();
    let mid = center_a + best_axis * (extent_a - min_overlap * 0.5);

    Some(CollisionResult {
        colliding: true,
        signed_distance: -min_overlap,
        point_on_a: mid + best_axis * (min_overlap * 0.5),
        point_on_b: mid - best_axis * (min_overlap * 0.5),
        normal: -best_axis,
    })
}

/// Test a single SAT axis. Returns Some(overlap) if overlapping, None if separating.
fn sat_test_axis(
    axis: DVec3,
    axes_a: &[DVec3; 3],
    half_a: &[f64; 3],
    axes_b: &[DVec3; 3],
    half_b: &[f64; 3],
    t: DVec3,
) -> Option<f64> {
    let mut proj_a = 0.0;
    for i in 0..3 {
        proj_a += half_a[i] * axes_a[i].dot(axis).abs();
    }
    let mut proj_b = 0.0;
    for i in 0..3 {
        proj_b += half_b[i] * axes_b[i].dot(axis).abs();
    }

    let dist = t.dot(axis).abs();
    let overlap = proj_a + proj_b - dist;

    if overlap > 0.0 {
        Some(overlap)
    } else {
        None
    }
}

/// Bounded convex shape A against a half-space B.
pub fn convex_half_space(
    shape: &ColliderShape,
    transform: &GlobalTransform,
    plane_normal: DVec3,
    plane_transform: &GlobalTransform,
) -> CollisionResult {
    let normal = plane_transform
        .transform_vector(plane_normal)
        .try_normalize()
        .unwrap_or(DVec3::Z);
    let origin = plane_transform.translation();

    let deepest = shape.support(-normal, transform);
    let height = normal.dot(deepest - origin);
    CollisionResult {
        colliding: height < 0.0,
        signed_distance: height,
        point_on_a: deepest,
        point_on_b: deepest - normal * height,
        normal,
    }
}

/// Detect collision between two shapes, dispatching to specialized tests where possible.
pub fn detect_collision(
    shape_a: &ColliderShape,
    transform_a: &GlobalTransform,
    shape_b: &ColliderShape,
    transform_b: &GlobalTransform,
) -> CollisionResult {
    match (shape_a, shape_b) {
        (ColliderShape::Sphere { radius: ra }, ColliderShape::Sphere { radius: rb }) => {
            sphere_sphere(transform_a.translation(), *ra, transform_b.translation(), *rb)
        }
        (ColliderShape::Box { half_extents }, ColliderShape::Sphere { radius }) => {
            box_sphere(*half_extents, transform_a.0, transform_b.translation(), *radius)
        }
        (ColliderShape::Sphere { .. }, ColliderShape::Box { .. }) => {
            detect_collision(shape_b, transform_b, shape_a, transform_a).swapped()
        }
        (
            ColliderShape::Box {
                half_extents: half_a,
            },
            ColliderShape::Box {
                half_extents: half_b,
            },
        ) => sat_box_box(*half_a, transform_a.0, *half_b, transform_b.0)
            .unwrap_or_else(|| gjk_epa(shape_a, transform_a, shape_b, transform_b)),
        (ColliderShape::HalfSpace { .. }, ColliderShape::HalfSpace { .. }) => {
            CollisionResult::separated()
        }
        (_, ColliderShape::HalfSpace { normal }) => {
            convex_half_space(shape_a, transform_a, *normal, transform_b)
        }
        (ColliderShape::HalfSpace { .. }, _) => {
            detect_collision(shape_b, transform_b, shape_a, transform_a).swapped()
        }
        _ => gjk_epa(shape_a, transform_a, shape_b, transform_b),
    }
}

/// Point query against a convex hull, via GJK/EPA against a point shape.
pub fn point_query_convex(hull: &ColliderShape, transform: &GlobalTransform, point: DVec3) -> PointQuery {
    let point_transform = GlobalTransform(DAffine3::from_translation(point));
    let result = gjk_epa(hull, transform, &ColliderShape::Point, &point_transform);
    let distance = result.point_on_a.distance(point);
    PointQuery {
        closest: result.point_on_a,
        normal: -result.normal,
        is_inside: result.colliding,
        signed_distance: if result.colliding { -distance } else { distance },
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! SVG path generation for link geometry.
//!
//! Everything here is a pure function over a [`Context`]: endpoints are
//! resolved through entity world positions and socket offsets at call time,
//! so paths are always consistent with the current graph state. Waypoints
//! are absolute world coordinates threaded between the endpoints.

use flowgraph_core::{Context, LinkId, LinkKind, Vec2};
use std::fmt::Write;

/// Minimum horizontal run out of a socket before a step path may turn.
const MIN_STEP_OFFSET: f32 = 20.0;
/// Corner radius for smooth step paths.
const BORDER_RADIUS: f32 = 10.0;

/// Format a coordinate the way SVG consumers expect: integral values
/// without a fractional part.
fn fmt(v: f32) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Resolve a link's world-space endpoints: each entity's world position
/// plus the socket's offset. `None` when the link or either socket is gone.
pub fn link_points<T: Clone>(ctx: &Context<T>, id: LinkId) -> Option<(Vec2, Vec2)> {
    let link = ctx.link(id)?;
    let from_socket = ctx.socket(link.from)?;
    let to_socket = ctx.socket(link.to)?;
    ctx.entity(from_socket.entity_id)?;
    ctx.entity(to_socket.entity_id)?;

    let from = ctx.world_position(from_socket.entity_id) + from_socket.offset;
    let to = ctx.world_position(to_socket.entity_id) + to_socket.offset;
    Some((from, to))
}

/// The visual center of a link, for placing labels or overlays: the
/// midpoint of the middle segment of its polyline.
pub fn link_center<T: Clone>(ctx: &Context<T>, id: LinkId) -> Option<Vec2> {
    let (from, to) = link_points(ctx, id)?;
    let link = ctx.link(id)?;

    let mut points = Vec::with_capacity(link.waypoints.len() + 2);
    points.push(from);
    points.extend(link.waypoints.iter().copied());
    points.push(to);

    let mid = (points.len() - 1) / 2;
    let p1 = points[mid];
    let p2 = points[mid + 1];
    Some(Vec2::new((p1.x + p2.x) / 2.0, (p1.y + p2.y) / 2.0))
}

/// Build an SVG path string for a link, routed per its kind through its
/// waypoints. `None` when the link or either socket is gone.
pub fn link_path<T: Clone>(ctx: &Context<T>, id: LinkId) -> Option<String> {
    let (from, to) = link_points(ctx, id)?;
    let link = ctx.link(id)?;

    let mut points = Vec::with_capacity(link.waypoints.len() + 2);
    points.push(from);
    points.extend(link.waypoints.iter().copied());
    points.push(to);

    let path = match link.kind {
        LinkKind::Line => line_path(&points),
        LinkKind::Bezier => bezier_path(&points),
        LinkKind::Step => step_path(&points, false),
        LinkKind::SmoothStep => step_path(&points, true),
    };
    Some(path)
}

/// Straight segments through every point.
fn line_path(points: &[Vec2]) -> String {
    let mut path = String::new();
    for (i, p) in points.iter().enumerate() {
        let cmd = if i == 0 { "M" } else { "L" };
        let _ = write!(path, "{}{} {} {}", if i == 0 { "" } else { " " }, cmd, fmt(p.x), fmt(p.y));
    }
    path
}

/// Cubic curves with horizontal control handles. A plain two-point link
/// gets a generous handle; waypointed segments use tighter ones.
fn bezier_path(points: &[Vec2]) -> String {
    if points.len() == 2 {
        let (p1, p2) = (points[0], points[1]);
        let dx = (p1.x - p2.x).abs();
        let offset = (dx / 2.0).max(50.0);
        return format!(
            "M {} {} C {} {}, {} {}, {} {}",
            fmt(p1.x),
            fmt(p1.y),
            fmt(p1.x + offset),
            fmt(p1.y),
            fmt(p2.x - offset),
            fmt(p2.y),
            fmt(p2.x),
            fmt(p2.y)
        );
    }

    let mut path = format!("M {} {}", fmt(points[0].x), fmt(points[0].y));
    for pair in points.windows(2) {
        let (p1, p2) = (pair[0], pair[1]);
        let dx = (p1.x - p2.x).abs();
        let offset = (dx / 2.0).max(20.0);
        let _ = write!(
            path,
            " C {} {}, {} {}, {} {}",
            fmt(p1.x + offset),
            fmt(p1.y),
            fmt(p2.x - offset),
            fmt(p2.y),
            fmt(p2.x),
            fmt(p2.y)
        );
    }
    path
}

/// Axis-aligned routing. Each segment runs straight out of its start,
/// turns at the horizontal midpoint, and runs straight into its end; the
/// smooth variant rounds both turns with quadratic corners, shrinking the
/// radius when a segment is too short to fit it.
fn step_path(points: &[Vec2], smooth: bool) -> String {
    let mut path = format!("M {} {}", fmt(points[0].x), fmt(points[0].y));
    let last = points.len() - 2;

    for (i, pair) in points.windows(2).enumerate() {
        let (p1, p2) = (pair[0], pair[1]);

        let start_x = if i == 0 { p1.x + MIN_STEP_OFFSET } else { p1.x };
        let end_x = if i == last { p2.x - MIN_STEP_OFFSET } else { p2.x };

        if i == 0 {
            let _ = write!(path, " L {} {}", fmt(start_x), fmt(p1.y));
        }

        let mid_x = (start_x + end_x) / 2.0;

        if !smooth {
            let _ = write!(
                path,
                " L {} {} L {} {} L {} {}",
                fmt(mid_x),
                fmt(p1.y),
                fmt(mid_x),
                fmt(p2.y),
                fmt(end_x),
                fmt(p2.y)
            );
        } else {
            let sign_x = if end_x > start_x { 1.0 } else { -1.0 };
            let sign_y = if p2.y > p1.y { 1.0 } else { -1.0 };
            let radius = BORDER_RADIUS
                .min((start_x - end_x).abs() / 2.0)
                .min((p1.y - p2.y).abs() / 2.0);

            if radius < 1.0 {
                let _ = write!(path, " L {} {}", fmt(end_x), fmt(p2.y));
            } else {
                let _ = write!(
                    path,
                    " L {} {} Q {} {} {} {} L {} {} Q {} {} {} {} L {} {}",
                    fmt(mid_x - radius * sign_x),
                    fmt(p1.y),
                    fmt(mid_x),
                    fmt(p1.y),
                    fmt(mid_x),
                    fmt(p1.y + radius * sign_y),
                    fmt(mid_x),
                    fmt(p2.y - radius * sign_y),
                    fmt(mid_x),
                    fmt(p2.y),
                    fmt(mid_x + radius * sign_x),
                    fmt(p2.y),
                    fmt(end_x),
                    fmt(p2.y)
                );
            }
        }

        if i == last {
            let _ = write!(path, " L {} {}", fmt(p2.x), fmt(p2.y));
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::{LinkSpec, SocketKind};
    use serde_json::Value;

    /// Two linked entities with the target at the given position.
    fn linked(
        to_pos: Vec2,
        kind: LinkKind,
    ) -> (Context<Value>, LinkId) {
        let mut ctx: Context<Value> = Context::new();
        let a = ctx.new_entity(Value::Null);
        let b = ctx.new_entity(Value::Null);
        ctx.move_entity(b, to_pos.x, to_pos.y);
        let out = ctx.new_socket(a, SocketKind::Output, "out").unwrap();
        let input = ctx.new_socket(b, SocketKind::Input, "in").unwrap();
        let lid = ctx
            .new_link_with(LinkSpec::new(out, input).kind(kind))
            .unwrap();
        (ctx, lid)
    }

    #[test]
    fn test_points_include_socket_and_group_offsets() {
        let (mut ctx, lid) = linked(Vec2::new(200.0, 0.0), LinkKind::Line);
        let link = ctx.link(lid).unwrap();
        let (from_socket, to_socket) = (link.from, link.to);
        ctx.set_socket_offset(from_socket, Vec2::new(40.0, 10.0));

        let group = ctx.new_group("g");
        let to_entity = ctx.socket(to_socket).unwrap().entity_id;
        ctx.add_to_group(group, to_entity);
        ctx.move_group(group, 0.0, 100.0);

        let (from, to) = link_points(&ctx, lid).unwrap();
        assert_eq!(from, Vec2::new(40.0, 10.0));
        assert_eq!(to, Vec2::new(200.0, 100.0));
    }

    #[test]
    fn test_line_path_threads_waypoints() {
        let (mut ctx, lid) = linked(Vec2::new(100.0, 100.0), LinkKind::Line);
        ctx.set_link_waypoints(lid, vec![Vec2::new(50.0, 0.0)]);
        assert_eq!(
            link_path(&ctx, lid).unwrap(),
            "M 0 0 L 50 0 L 100 100"
        );
    }

    #[test]
    fn test_bezier_two_point_handles() {
        let (ctx, lid) = linked(Vec2::new(100.0, 0.0), LinkKind::Bezier);
        assert_eq!(
            link_path(&ctx, lid).unwrap(),
            "M 0 0 C 50 0, 50 0, 100 0"
        );
    }

    #[test]
    fn test_bezier_handle_has_minimum_reach() {
        // close endpoints still get the 50-unit handle
        let (ctx, lid) = linked(Vec2::new(10.0, 0.0), LinkKind::Bezier);
        assert_eq!(
            link_path(&ctx, lid).unwrap(),
            "M 0 0 C 50 0, -40 0, 10 0"
        );
    }

    #[test]
    fn test_bezier_waypoint_segments_use_tight_handles() {
        let (mut ctx, lid) = linked(Vec2::new(20.0, 40.0), LinkKind::Bezier);
        ctx.set_link_waypoints(lid, vec![Vec2::new(10.0, 20.0)]);
        assert_eq!(
            link_path(&ctx, lid).unwrap(),
            "M 0 0 C 20 0, -10 20, 10 20 C 30 20, 0 40, 20 40"
        );
    }

    #[test]
    fn test_step_path_shoulders_and_turns() {
        let (ctx, lid) = linked(Vec2::new(200.0, 200.0), LinkKind::Step);
        let path = link_path(&ctx, lid).unwrap();
        assert!(path.starts_with("M 0 0"));
        assert!(path.contains("L 20 0"));
        assert!(path.contains("L 100 0 L 100 200"));
        assert!(path.ends_with("L 200 200"));
    }

    #[test]
    fn test_smooth_step_rounds_corners() {
        let (ctx, lid) = linked(Vec2::new(200.0, 200.0), LinkKind::SmoothStep);
        let path = link_path(&ctx, lid).unwrap();
        assert!(path.contains("Q 100 0 100 10"));
        assert!(path.contains("Q 100 200 110 200"));
    }

    #[test]
    fn test_smooth_step_degenerates_to_straight_run() {
        // no vertical travel leaves no room for a corner radius
        let (ctx, lid) = linked(Vec2::new(200.0, 0.0), LinkKind::SmoothStep);
        assert_eq!(
            link_path(&ctx, lid).unwrap(),
            "M 0 0 L 20 0 L 180 0 L 200 0"
        );
    }

    #[test]
    fn test_center_without_waypoints() {
        let (ctx, lid) = linked(Vec2::new(100.0, 50.0), LinkKind::Line);
        assert_eq!(link_center(&ctx, lid).unwrap(), Vec2::new(50.0, 25.0));
    }

    #[test]
    fn test_center_picks_middle_segment() {
        let (mut ctx, lid) = linked(Vec2::new(100.0, 0.0), LinkKind::Line);
        ctx.set_link_waypoints(lid, vec![Vec2::new(50.0, 100.0)]);
        assert_eq!(link_center(&ctx, lid).unwrap(), Vec2::new(75.0, 50.0));
    }

    #[test]
    fn test_missing_link_yields_none() {
        let ctx: Context<Value> = Context::new();
        assert!(link_points(&ctx, LinkId(9)).is_none());
        assert!(link_path(&ctx, LinkId(9)).is_none());
        assert!(link_center(&ctx, LinkId(9)).is_none());
    }
}

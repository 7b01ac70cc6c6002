//! Ball and paddle simulation for one tick of a match
//!
//! All motion is integrated per tick: velocities are expressed in canvas
//! units per tick, so the functions here take no delta time. The session
//! state machine calls `advance_paddle` for both paddles and then
//! `advance_ball` once per tick while playing.

use log::debug;
use rand::Rng;
use shared::{
    Ball, Paddle, PaddleDirection, Score, Side, BALL_SPEED_INCREMENT, CANVAS_HEIGHT, CANVAS_WIDTH,
    MAX_BOUNCE_ANGLE, PADDLE_HEIGHT, PADDLE_SPEED,
};

/// Applies the paddle's input state to its position. A paddle that would
/// leave its track is clamped to the boundary and stops dead (no bounce).
pub fn advance_paddle(paddle: &mut Paddle) {
    let dy = match paddle.direction {
        PaddleDirection::Up => -PADDLE_SPEED,
        PaddleDirection::Down => PADDLE_SPEED,
        PaddleDirection::Idle => 0.0,
    };

    let next = paddle.y + dy;
    if next < 0.0 {
        paddle.y = 0.0;
        paddle.direction = PaddleDirection::Idle;
    } else if next > Paddle::max_y() {
        paddle.y = Paddle::max_y();
        paddle.direction = PaddleDirection::Idle;
    } else {
        paddle.y = next;
    }
}

/// Advances the ball one tick: integrates position, reflects off the top and
/// bottom walls, deflects off paddles, and resolves scoring.
///
/// Returns the side that scored this tick, if any. On a score the ball is
/// re-served from the canvas center at `base_speed` with a randomized
/// direction; paddle positions are untouched.
///
/// A ball fast enough to cross a paddle in a single tick passes through it.
/// The tick rate keeps speeds well below that threshold in practice; the
/// limitation is covered by tests at extreme speeds.
pub fn advance_ball(
    ball: &mut Ball,
    left: &Paddle,
    right: &Paddle,
    score: &mut Score,
    base_speed: f32,
) -> Option<Side> {
    ball.x += ball.vx;
    ball.y += ball.vy;

    // Elastic reflection off the horizontal walls: |vy| is preserved.
    if ball.y - ball.radius < 0.0 {
        ball.y = ball.radius;
        ball.vy = -ball.vy;
    } else if ball.y + ball.radius > CANVAS_HEIGHT {
        ball.y = CANVAS_HEIGHT - ball.radius;
        ball.vy = -ball.vy;
    }

    // Only deflect a ball moving toward the paddle it overlaps, so a slow
    // ball cannot be re-deflected on consecutive ticks.
    if ball.vx < 0.0 && overlaps(ball, left) {
        deflect(ball, left);
    } else if ball.vx > 0.0 && overlaps(ball, right) {
        deflect(ball, right);
    }

    if ball.x - ball.radius < 0.0 {
        score.award(Side::Right);
        serve(ball, base_speed);
        return Some(Side::Right);
    }
    if ball.x + ball.radius > CANVAS_WIDTH {
        score.award(Side::Left);
        serve(ball, base_speed);
        return Some(Side::Left);
    }

    None
}

/// Recenters the ball and gives it a fresh randomized serve direction at
/// the given speed.
pub fn serve(ball: &mut Ball, base_speed: f32) {
    let mut rng = rand::thread_rng();
    let angle = rng.gen_range(-MAX_BOUNCE_ANGLE..MAX_BOUNCE_ANGLE);
    let dir: f32 = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

    ball.x = CANVAS_WIDTH / 2.0;
    ball.y = CANVAS_HEIGHT / 2.0;
    ball.speed = base_speed;
    ball.vx = dir * base_speed * angle.cos();
    ball.vy = base_speed * angle.sin();
}

/// AABB overlap test between the ball's bounding box and a paddle.
fn overlaps(ball: &Ball, paddle: &Paddle) -> bool {
    let (bx1, by1, bx2, by2) = ball.bounds();
    let (px1, py1, px2, py2) = paddle.bounds();

    !(bx2 <= px1 || px2 <= bx1 || by2 <= py1 || py2 <= by1)
}

/// Recomputes the ball's velocity after a paddle hit. The exit angle scales
/// with the hit offset from the paddle center (up to ±45° at the edges) and
/// every deflection adds a fixed speed increment, so long rallies escalate.
fn deflect(ball: &mut Ball, paddle: &Paddle) {
    let half = PADDLE_HEIGHT / 2.0;
    let offset = ((ball.y - paddle.center_y()) / half).clamp(-1.0, 1.0);
    let angle = offset * MAX_BOUNCE_ANGLE;

    // Exit direction points at the far half of the canvas.
    let dir: f32 = if ball.x < CANVAS_WIDTH / 2.0 { 1.0 } else { -1.0 };

    ball.speed += BALL_SPEED_INCREMENT;
    ball.vx = dir * ball.speed * angle.cos();
    ball.vy = ball.speed * angle.sin();

    debug!(
        "paddle deflection at offset {:.2}, rally speed now {:.1}",
        offset, ball.speed
    );
}

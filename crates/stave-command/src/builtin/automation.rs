use serde::{Deserialize, Serialize};
use stave_pool::{NodeArgs, NodeClass, Pool, PoolError, TimeSignature};
use stave_types::{NodeId, Wrapped};

use super::check_index;
use crate::command::Command;
use crate::error::{CommandError, CommandResult};

const LANE: &str = "automation";

/// Control points of a track's automation lane as `(id, time)`, in order.
fn lane(command: &str, pool: &Pool, track: NodeId) -> CommandResult<Vec<(NodeId, i64)>> {
    let node = pool.get(track)?;
    if node.class() != NodeClass::Track {
        return Err(CommandError::rejected(
            command,
            format!("{} has no automation lane", node.class()),
        ));
    }
    let points = pool.field(track, LANE)?.owned_children();
    points
        .iter()
        .map(|id| {
            let time = pool.get(*id)?.int("time").unwrap_or_default();
            Ok((*id, time))
        })
        .collect()
}

/// Add a control point to a track, keeping the lane sorted by time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddControlPoint {
    pub time: i64,
    pub value: f64,
}

impl Command for AddControlPoint {
    const NAME: &'static str = "AddControlPoint";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let points = lane(Self::NAME, pool, target)?;
        if self.time < 0 {
            return Err(CommandError::rejected(Self::NAME, "time must not be negative"));
        }
        if !self.value.is_finite() {
            return Err(CommandError::rejected(Self::NAME, "value must be finite"));
        }
        if points.iter().any(|(_, t)| *t == self.time) {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("a control point already exists at time {}", self.time),
            ));
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        let position = lane(Self::NAME, pool, target)?
            .iter()
            .filter(|(_, t)| *t < self.time)
            .count();
        let point = pool.create(
            NodeClass::ControlPoint,
            &NodeArgs::new().set("time", self.time).set("value", self.value),
        )?;
        pool.attach_child(target, LANE, point, Some(position))?;
        Ok(())
    }
}

/// Move the control point at `index` to a new time between its neighbours.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveControlPoint {
    pub index: usize,
    pub time: i64,
}

impl Command for MoveControlPoint {
    const NAME: &'static str = "MoveControlPoint";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let points = lane(Self::NAME, pool, target)?;
        check_index(Self::NAME, self.index, points.len(), false)?;
        let after = self.index.checked_sub(1).map_or(-1, |i| points[i].1);
        let before = points.get(self.index + 1).map(|(_, t)| *t);
        let in_order = self.time > after && before.map_or(true, |b| self.time < b);
        if !in_order {
            let upper = before.map_or_else(|| "end".to_string(), |b| b.to_string());
            return Err(CommandError::rejected(
                Self::NAME,
                format!(
                    "time {} would reorder the lane; it must lie in ({after}, {upper})",
                    self.time
                ),
            ));
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        let points = lane(Self::NAME, pool, target)?;
        let (point, _) = points.get(self.index).copied().ok_or_else(|| {
            CommandError::rejected(Self::NAME, format!("no control point at {}", self.index))
        })?;
        pool.set(point, "time", self.time)?;
        Ok(())
    }
}

/// Replace the time signature of a measure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetTimeSignature {
    pub upper: u8,
    pub lower: u8,
}

impl SetTimeSignature {
    fn signature(&self) -> TimeSignature {
        TimeSignature {
            upper: self.upper,
            lower: self.lower,
        }
    }
}

impl Command for SetTimeSignature {
    const NAME: &'static str = "SetTimeSignature";

    fn validate(&self, target: NodeId, pool: &Pool) -> CommandResult<()> {
        let node = pool.get(target)?;
        if node.class() != NodeClass::Measure {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{} has no time signature", node.class()),
            ));
        }
        if !self.signature().is_valid() {
            return Err(CommandError::rejected(
                Self::NAME,
                format!("{}/{} is not a valid time signature", self.upper, self.lower),
            ));
        }
        Ok(())
    }

    fn run(&self, target: NodeId, pool: &mut Pool) -> CommandResult<()> {
        let wrapped = Wrapped::encode(&self.signature()).map_err(PoolError::from)?;
        pool.set(target, "time_signature", wrapped)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use stave_pool::FieldValue;
    use stave_types::ErrorKind;

    use super::*;
    use crate::builtin::testing::song;
    use crate::executor::execute;

    fn times(pool: &Pool, track: NodeId) -> Vec<i64> {
        lane("test", pool, track)
            .unwrap()
            .into_iter()
            .map(|(_, t)| t)
            .collect()
    }

    #[test]
    fn control_points_stay_sorted() {
        let (mut pool, track, _) = song();
        for time in [480, 0, 960, 240] {
            execute(&mut pool, track, &AddControlPoint { time, value: 0.5 }).unwrap();
        }
        assert_eq!(times(&pool, track), vec![0, 240, 480, 960]);

        let err = execute(&mut pool, track, &AddControlPoint { time: 240, value: 1.0 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);

        let err = execute(
            &mut pool,
            track,
            &AddControlPoint {
                time: 10,
                value: f64::NAN,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
    }

    #[test]
    fn move_control_point_between_neighbours() {
        let (mut pool, track, measure) = song();
        for time in [0, 480, 960] {
            execute(&mut pool, track, &AddControlPoint { time, value: 0.0 }).unwrap();
        }
        execute(&mut pool, track, &MoveControlPoint { index: 1, time: 700 }).unwrap();
        assert_eq!(times(&pool, track), vec![0, 700, 960]);
        execute(&mut pool, track, &MoveControlPoint { index: 2, time: 5000 }).unwrap();

        let err = execute(&mut pool, track, &MoveControlPoint { index: 1, time: 0 }).unwrap_err();
        assert!(err.to_string().contains("(0, 5000)"), "{err}");
        let err = execute(&mut pool, track, &MoveControlPoint { index: 3, time: 1 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
        let err = execute(&mut pool, measure, &MoveControlPoint { index: 0, time: 1 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
    }

    #[test]
    fn time_signature_round_trips_through_wrapped_value() {
        let (mut pool, track, measure) = song();
        execute(&mut pool, measure, &SetTimeSignature { upper: 7, lower: 8 }).unwrap();
        match pool.field(measure, "time_signature").unwrap() {
            FieldValue::Wrapped(w) => assert_eq!(
                w.decode::<TimeSignature>().unwrap(),
                TimeSignature { upper: 7, lower: 8 }
            ),
            other => panic!("unexpected {other:?}"),
        }

        for (target, upper, lower) in [(measure, 3, 3), (measure, 0, 4), (track, 4, 4)] {
            let err = execute(&mut pool, target, &SetTimeSignature { upper, lower }).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
        }
    }
}

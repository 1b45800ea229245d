/// What the operator asked for after an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Write poses, then the mesh, and stop.
    SaveAll,
    SavePosesOnly,
    SaveMeshOnly,
    /// Stop without writing anything.
    SaveNothing,
    Continue,
}

impl Command {
    /// Map a pressed key; anything unbound keeps the loop running.
    pub fn from_key(key: Option<char>) -> Self {
        match key {
            Some('a') => Command::SaveAll,
            Some('p') => Command::SavePosesOnly,
            Some('m') => Command::SaveMeshOnly,
            Some(' ') => Command::SaveNothing,
            _ => Command::Continue,
        }
    }

    pub fn stops(self) -> bool {
        self != Command::Continue
    }

    pub fn saves_poses(self) -> bool {
        matches!(self, Command::SaveAll | Command::SavePosesOnly)
    }

    pub fn saves_mesh(self) -> bool {
        matches!(self, Command::SaveAll | Command::SaveMeshOnly)
    }
}

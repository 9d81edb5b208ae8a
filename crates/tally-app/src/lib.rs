// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod export;
pub mod forms;
pub mod ids;
pub mod installments;
pub mod model;
pub mod roster;
pub mod state;

pub use export::*;
pub use forms::*;
pub use ids::*;
pub use installments::*;
pub use model::*;
pub use roster::*;
pub use state::*;

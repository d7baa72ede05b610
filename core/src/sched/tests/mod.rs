// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios for the dispatch loop. These drive real `run()`
//! invocations with real pipes and real signal delivery, so they are
//! serialized: shutdown signals are process-global.

mod dispatch_loop_tests;

use crate::scenario::ScenarioLayout;
use sim_network::engine::SimulationReport;

pub fn print_topology(layout: &ScenarioLayout) {
    println!("--- Topology ---");
    println!(
        "* Point-to-point: {} ({}) <-> {} ({})",
        layout.p2p_nodes[0],
        layout.p2p_addresses[0],
        layout.p2p_nodes[1],
        layout.p2p_addresses[1],
    );

    let first = layout.csma_addresses.first();
    let last = layout.csma_addresses.last();
    if let (Some(first), Some(last)) = (first, last) {
        println!(
            "* Csma: {} nodes ({first} to {last})",
            layout.csma_nodes.len()
        );
    }

    println!(
        "* Devices: {} point-to-point, {} csma",
        layout.p2p_devices.len(),
        layout.csma_devices.len()
    );
    for (device, promiscuous) in &layout.traced_devices {
        let mode = if *promiscuous { " (promiscuous)" } else { "" };
        println!("* Capturing on {device}{mode}");
    }
}

pub fn print_applications(layout: &ScenarioLayout, report: &SimulationReport) {
    println!("--- Applications ---");
    for placed in [&layout.server, &layout.client] {
        let Some(app) = report.applications.get(placed.id.index()) else {
            continue;
        };

        println!(
            "* {} on {} [{:?}, {:?})",
            app.kind,
            app.node,
            placed.window.start(),
            placed.window.stop(),
        );
        if placed.id == layout.client.id {
            println!(
                "  * Target: {} ({} x {} bytes, every {:?})",
                layout.client_spec.remote,
                layout.client_spec.max_packets,
                layout.client_spec.packet_size,
                layout.client_spec.interval,
            );
        }
        println!(
            "  * Sent: {} packets ({} bytes)",
            app.stats.sent.packets, app.stats.sent.bytes
        );
        println!(
            "  * Received: {} packets ({} bytes)",
            app.stats.received.packets, app.stats.received.bytes
        );
    }
}

pub fn print_node_stats(layout: &ScenarioLayout, report: &SimulationReport) {
    println!("--- Node stats ---");
    let stats = report.stats();

    // Only the nodes that take part in the exchange, the rest of the segment stays silent
    let nodes = [layout.client.node, layout.p2p_nodes[1], layout.server.node];
    for node in nodes {
        let Some(name) = report.node_ids.get(node.index()) else {
            continue;
        };
        let Some(stats) = stats.stats_by_node.get(name) else {
            continue;
        };

        println!("* {name}");
        println!(
            "  * Sent packets: {} ({} bytes)",
            stats.sent.packets, stats.sent.bytes
        );
        println!(
            "  * Received packets: {} ({} bytes)",
            stats.received.packets, stats.received.bytes
        );
        println!(
            "    | {} packets forwarded ({} bytes)",
            stats.forwarded.packets, stats.forwarded.bytes
        );
        println!(
            "    | {} packets delivered to applications ({} bytes)",
            stats.delivered.packets, stats.delivered.bytes
        );
        println!(
            "  * Dropped packets: {} ({} bytes)",
            stats.dropped.packets, stats.dropped.bytes
        );
    }
}

pub fn print_capture_files(report: &SimulationReport) {
    println!("--- Capture files ---");
    for file_name in &report.pcap_files {
        println!("* {file_name}");
    }

    println!(
        "* Simulation finished at {} after {} events",
        report.end_time, report.executed_events
    );
}
